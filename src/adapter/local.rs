//! Pass-through adapter onto a real directory.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use super::{DirEntry, DiskAdapter, DiskStat};
use crate::error::{Result, VfsError};
use crate::node::{NodeType, Permissions};
use crate::path as vpath;

const TRASH_DIR: &str = ".trash";

/// Mount backend over a host directory, driven by `tokio::fs`.
///
/// Relative paths are normalized before joining, so a crafted `..`
/// can never escape the root. The `.trash` subdirectory holds
/// trash-delegated nodes and is hidden from listings.
#[derive(Debug)]
pub struct LocalDiskAdapter {
    root: PathBuf,
    root_display: String,
}

impl LocalDiskAdapter {
    /// Instantiate over `root`, canonicalizing when possible.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        let root_display = root.to_string_lossy().into_owned();
        Self { root, root_display }
    }

    /// Combines the root with a normalized relative path.
    fn full_path(&self, rel: &str) -> PathBuf {
        let normalized = vpath::normalize(rel);
        if normalized == "/" {
            self.root.clone()
        } else {
            self.root.join(&normalized[1..])
        }
    }

    fn trash_path(&self, trash_id: &str) -> PathBuf {
        self.root.join(TRASH_DIR).join(trash_id)
    }
}

fn system_time_ms(time: std::io::Result<SystemTime>) -> u64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn metadata_to_stat(rel: &str, meta: &std::fs::Metadata) -> DiskStat {
    let node_type = if meta.is_dir() {
        NodeType::Directory
    } else if meta.is_symlink() {
        NodeType::Symlink
    } else {
        NodeType::File
    };
    DiskStat {
        path: rel.to_string(),
        node_type,
        size: if meta.is_file() { meta.len() } else { 0 },
        created_at: system_time_ms(meta.created()),
        modified_at: system_time_ms(meta.modified()),
        permissions: Permissions {
            read: true,
            write: !meta.permissions().readonly(),
            execute: meta.is_dir(),
        },
    }
}

fn io_err(rel: &str, err: std::io::Error) -> VfsError {
    VfsError::from(err).with_path(rel)
}

#[async_trait]
impl DiskAdapter for LocalDiskAdapter {
    fn root_path(&self) -> &str {
        &self.root_display
    }

    async fn create_file(&self, rel: &str) -> Result<()> {
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.full_path(rel))
            .await
            .map(|_| ())
            .map_err(|err| io_err(rel, err))
    }

    async fn create_dir(&self, rel: &str) -> Result<()> {
        fs::create_dir(self.full_path(rel)).await.map_err(|err| io_err(rel, err))
    }

    async fn read_file(&self, rel: &str, offset: u64, length: usize) -> Result<Vec<u8>> {
        let mut file =
            fs::File::open(self.full_path(rel)).await.map_err(|err| io_err(rel, err))?;
        let len = file.metadata().await.map_err(|err| io_err(rel, err))?.len();
        if offset >= len {
            return Ok(Vec::new());
        }
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|err| io_err(rel, err))?;
        let count = length.min((len - offset) as usize);
        let mut buf = vec![0u8; count];
        file.read_exact(&mut buf).await.map_err(|err| io_err(rel, err))?;
        Ok(buf)
    }

    async fn write_file(&self, rel: &str, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(self.full_path(rel))
            .await
            .map_err(|err| io_err(rel, err))?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|err| io_err(rel, err))?;
        file.write_all(data).await.map_err(|err| io_err(rel, err))?;
        file.flush().await.map_err(|err| io_err(rel, err))?;
        Ok(())
    }

    async fn truncate(&self, rel: &str, size: u64) -> Result<()> {
        let file = fs::OpenOptions::new()
            .write(true)
            .open(self.full_path(rel))
            .await
            .map_err(|err| io_err(rel, err))?;
        file.set_len(size).await.map_err(|err| io_err(rel, err))
    }

    async fn delete(&self, rel: &str) -> Result<()> {
        let full = self.full_path(rel);
        let meta = fs::symlink_metadata(&full).await.map_err(|err| io_err(rel, err))?;
        if meta.is_dir() {
            fs::remove_dir(&full).await.map_err(|err| io_err(rel, err))
        } else {
            fs::remove_file(&full).await.map_err(|err| io_err(rel, err))
        }
    }

    async fn list(&self, rel: &str) -> Result<Vec<DirEntry>> {
        let mut dir =
            fs::read_dir(self.full_path(rel)).await.map_err(|err| io_err(rel, err))?;
        let at_root = vpath::normalize(rel) == "/";
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|err| io_err(rel, err))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if at_root && name == TRASH_DIR {
                continue;
            }
            let file_type = entry.file_type().await.map_err(|err| io_err(rel, err))?;
            let node_type = if file_type.is_dir() {
                NodeType::Directory
            } else if file_type.is_symlink() {
                NodeType::Symlink
            } else {
                NodeType::File
            };
            entries.push(DirEntry { name, node_type });
        }
        Ok(entries)
    }

    async fn stat(&self, rel: &str) -> Result<DiskStat> {
        let meta =
            fs::symlink_metadata(self.full_path(rel)).await.map_err(|err| io_err(rel, err))?;
        Ok(metadata_to_stat(&vpath::normalize(rel), &meta))
    }

    async fn exists(&self, rel: &str) -> Result<bool> {
        Ok(fs::symlink_metadata(self.full_path(rel)).await.is_ok())
    }

    async fn move_to_trash(&self, rel: &str, trash_id: &str) -> Result<()> {
        let target = self.trash_path(trash_id);
        fs::create_dir_all(target.parent().expect("trash path has a parent"))
            .await
            .map_err(|err| io_err(rel, err))?;
        fs::rename(self.full_path(rel), target).await.map_err(|err| io_err(rel, err))
    }

    async fn restore_from_trash(&self, trash_id: &str, rel: &str) -> Result<()> {
        let source = self.trash_path(trash_id);
        let destination = self.full_path(rel);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(|err| io_err(rel, err))?;
        }
        fs::rename(source, destination).await.map_err(|err| io_err(rel, err))
    }
}

impl LocalDiskAdapter {
    /// Host-side location of a relative path; test inspection aid.
    pub fn host_path(&self, rel: &str) -> PathBuf {
        self.full_path(rel)
    }

    pub fn root_dir(&self) -> &Path {
        &self.root
    }
}
