use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use keepfs::adapter::{
    ChannelWatcher, DirEntry, DiskAdapter, DiskStat, DiskWatcher, WatchFeed,
};
use keepfs::error::{Result, VfsError};
use keepfs::node::{NodeType, Permissions};
use keepfs::store::MemoryBlobStore;
use keepfs::{VfsConfig, VirtualFileSystem};

/// A filesystem over a shared in-memory store, so tests can "crash"
/// by building a second filesystem over the same blobs.
pub struct Fixture {
    pub store: Arc<MemoryBlobStore>,
    pub fs: VirtualFileSystem,
    pub config: VfsConfig,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(VfsConfig::default())
    }

    pub fn with_config(config: VfsConfig) -> Self {
        let store = Arc::new(MemoryBlobStore::new());
        let fs = VirtualFileSystem::new(store.clone(), config.clone());
        Self { store, fs, config }
    }

    /// Simulates a process restart: a fresh facade over the same store.
    pub fn reload(&self) -> VirtualFileSystem {
        VirtualFileSystem::new(self.store.clone(), self.config.clone())
    }
}

fn normalize(rel: &str) -> String {
    if rel.starts_with('/') {
        keepfs_normalize(rel)
    } else {
        keepfs_normalize(&format!("/{rel}"))
    }
}

// Minimal local copy of canonicalization for adapter keys; the facade
// always hands adapters normalized paths already.
fn keepfs_normalize(path: &str) -> String {
    let mut out = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        "/".into()
    } else {
        out
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".into(),
        Some(idx) => path[..idx].into(),
        None => "/".into(),
    }
}

#[derive(Default)]
struct DiskState {
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
    trash: HashMap<String, Vec<u8>>,
}

/// In-memory disk backend that records every call, for routing
/// assertions, plus an optional watcher feed.
pub struct MemoryDiskAdapter {
    root: String,
    state: AsyncMutex<DiskState>,
    calls: Mutex<Vec<String>>,
    watcher: Mutex<Option<ChannelWatcher>>,
}

impl MemoryDiskAdapter {
    pub fn new(root: &str) -> Arc<Self> {
        let mut dirs = HashSet::new();
        dirs.insert("/".to_string());
        Arc::new(Self {
            root: root.to_string(),
            state: AsyncMutex::new(DiskState { dirs, ..DiskState::default() }),
            calls: Mutex::new(Vec::new()),
            watcher: Mutex::new(None),
        })
    }

    /// Builds an adapter whose watcher is fed through the returned
    /// handle.
    pub fn with_watcher(root: &str) -> (Arc<Self>, WatchFeed) {
        let adapter = Self::new(root);
        let (feed, watcher) = ChannelWatcher::pair(64);
        *adapter.watcher.lock().unwrap() = Some(watcher);
        (adapter, feed)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    /// Mutates a file behind the filesystem's back, as an external
    /// process would.
    pub async fn plant_file(&self, rel: &str, data: &[u8]) {
        let rel = normalize(rel);
        let mut state = self.state.lock().await;
        let mut dir = parent_of(&rel);
        while dir != "/" {
            state.dirs.insert(dir.clone());
            dir = parent_of(&dir);
        }
        state.files.insert(rel, data.to_vec());
    }

    pub async fn peek_file(&self, rel: &str) -> Option<Vec<u8>> {
        self.state.lock().await.files.get(&normalize(rel)).cloned()
    }
}

#[async_trait]
impl DiskAdapter for MemoryDiskAdapter {
    fn root_path(&self) -> &str {
        &self.root
    }

    async fn create_file(&self, rel: &str) -> Result<()> {
        let rel = normalize(rel);
        self.record(format!("create_file {rel}"));
        let mut state = self.state.lock().await;
        if state.files.contains_key(&rel) {
            return Err(VfsError::already_exists(&rel));
        }
        state.files.insert(rel, Vec::new());
        Ok(())
    }

    async fn create_dir(&self, rel: &str) -> Result<()> {
        let rel = normalize(rel);
        self.record(format!("create_dir {rel}"));
        let mut state = self.state.lock().await;
        if !state.dirs.insert(rel.clone()) {
            return Err(VfsError::already_exists(&rel));
        }
        Ok(())
    }

    async fn read_file(&self, rel: &str, offset: u64, length: usize) -> Result<Vec<u8>> {
        let rel = normalize(rel);
        self.record(format!("read_file {rel} {offset} {length}"));
        let state = self.state.lock().await;
        let data = state.files.get(&rel).ok_or_else(|| VfsError::not_found(&rel))?;
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(Vec::new());
        }
        let end = (offset + length).min(data.len());
        Ok(data[offset..end].to_vec())
    }

    async fn write_file(&self, rel: &str, offset: u64, data: &[u8]) -> Result<()> {
        let rel = normalize(rel);
        self.record(format!("write_file {rel} {offset} {}", data.len()));
        let mut state = self.state.lock().await;
        let file = state.files.entry(rel).or_default();
        let offset = offset as usize;
        if file.len() < offset + data.len() {
            file.resize(offset + data.len(), 0);
        }
        file[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    async fn truncate(&self, rel: &str, size: u64) -> Result<()> {
        let rel = normalize(rel);
        self.record(format!("truncate {rel} {size}"));
        let mut state = self.state.lock().await;
        let file = state.files.get_mut(&rel).ok_or_else(|| VfsError::not_found(&rel))?;
        file.resize(size as usize, 0);
        Ok(())
    }

    async fn delete(&self, rel: &str) -> Result<()> {
        let rel = normalize(rel);
        self.record(format!("delete {rel}"));
        let mut state = self.state.lock().await;
        if state.files.remove(&rel).is_some() || state.dirs.remove(&rel) {
            Ok(())
        } else {
            Err(VfsError::not_found(&rel))
        }
    }

    async fn list(&self, rel: &str) -> Result<Vec<DirEntry>> {
        let rel = normalize(rel);
        self.record(format!("list {rel}"));
        let state = self.state.lock().await;
        if !state.dirs.contains(&rel) {
            return Err(VfsError::not_directory(&rel));
        }
        let mut entries = Vec::new();
        for dir in &state.dirs {
            if dir != "/" && parent_of(dir) == rel {
                entries.push(DirEntry {
                    name: dir.rsplit('/').next().unwrap().to_string(),
                    node_type: NodeType::Directory,
                });
            }
        }
        for file in state.files.keys() {
            if parent_of(file) == rel {
                entries.push(DirEntry {
                    name: file.rsplit('/').next().unwrap().to_string(),
                    node_type: NodeType::File,
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, rel: &str) -> Result<DiskStat> {
        let rel = normalize(rel);
        self.record(format!("stat {rel}"));
        let state = self.state.lock().await;
        if let Some(data) = state.files.get(&rel) {
            return Ok(DiskStat {
                path: rel.clone(),
                node_type: NodeType::File,
                size: data.len() as u64,
                created_at: 0,
                modified_at: 0,
                permissions: Permissions::default_file(),
            });
        }
        if state.dirs.contains(&rel) {
            return Ok(DiskStat {
                path: rel.clone(),
                node_type: NodeType::Directory,
                size: 0,
                created_at: 0,
                modified_at: 0,
                permissions: Permissions::default_dir(),
            });
        }
        Err(VfsError::not_found(&rel))
    }

    async fn exists(&self, rel: &str) -> Result<bool> {
        let rel = normalize(rel);
        let state = self.state.lock().await;
        Ok(state.files.contains_key(&rel) || state.dirs.contains(&rel))
    }

    async fn move_to_trash(&self, rel: &str, trash_id: &str) -> Result<()> {
        let rel = normalize(rel);
        self.record(format!("move_to_trash {rel} {trash_id}"));
        let mut state = self.state.lock().await;
        let data = state.files.remove(&rel).ok_or_else(|| VfsError::not_found(&rel))?;
        state.trash.insert(trash_id.to_string(), data);
        Ok(())
    }

    async fn restore_from_trash(&self, trash_id: &str, rel: &str) -> Result<()> {
        let rel = normalize(rel);
        self.record(format!("restore_from_trash {trash_id} {rel}"));
        let mut state = self.state.lock().await;
        let data = state
            .trash
            .remove(trash_id)
            .ok_or_else(|| VfsError::not_found(trash_id.to_string()))?;
        state.files.insert(rel, data);
        Ok(())
    }

    fn watcher(&self) -> Option<Box<dyn DiskWatcher>> {
        self.watcher.lock().unwrap().take().map(|w| Box::new(w) as Box<dyn DiskWatcher>)
    }
}
