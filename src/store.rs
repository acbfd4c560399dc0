//! Key/value blob storage backing the persistence layer.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::Result;

/// Durable key/value bytes used by the persistence manager.
///
/// `append` has a read-modify-write default so every store supports
/// it; stores with a native append should override it and report
/// [`BlobStore::supports_append`] so the log stays O(record) per
/// operation.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    fn supports_append(&self) -> bool {
        false
    }

    async fn append(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut blob = self.read(key).await?.unwrap_or_default();
        blob.extend_from_slice(data);
        self.write(key, &blob).await
    }
}

/// Volatile store for tests and demos.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips one byte of a stored blob. Test aid for corruption drills.
    pub async fn corrupt(&self, key: &str, index: usize) -> bool {
        let mut blobs = self.blobs.write().await;
        match blobs.get_mut(key) {
            Some(blob) if index < blob.len() => {
                blob[index] ^= 0xff;
                true
            }
            _ => false,
        }
    }

    /// Cuts a stored blob short. Test aid for crash-point drills.
    pub async fn truncate(&self, key: &str, len: usize) -> bool {
        let mut blobs = self.blobs.write().await;
        match blobs.get_mut(key) {
            Some(blob) => {
                blob.truncate(len);
                true
            }
            None => false,
        }
    }

    pub async fn len_of(&self, key: &str) -> Option<usize> {
        self.blobs.read().await.get(key).map(Vec::len)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.blobs.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        self.blobs.write().await.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }

    fn supports_append(&self) -> bool {
        true
    }

    async fn append(&self, key: &str, data: &[u8]) -> Result<()> {
        self.blobs.write().await.entry(key.to_string()).or_default().extend_from_slice(data);
        Ok(())
    }
}

/// Store keeping each key as a file under a base directory.
pub struct DirBlobStore {
    base: PathBuf,
}

impl DirBlobStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys may contain separators ("fs/snapshot"); they map to
        // subdirectories.
        self.base.join(key)
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn supports_append(&self) -> bool {
        true
    }

    async fn append(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file =
            tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(data).await?;
        Ok(())
    }
}
