//! Seams to real-disk backends.
//!
//! A mount forwards its subtree to a [`DiskAdapter`]. Adapters that can
//! observe external changes expose a [`DiskWatcher`]; the facade
//! bridges its events into the event bus.

mod local;

use async_trait::async_trait;

use crate::error::{Result, VfsError};
use crate::events::EventKind;
use crate::node::{NodeType, Permissions};

pub use crate::node::DirEntry;
pub use local::LocalDiskAdapter;

/// Metadata reported by an adapter, paths relative to its root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskStat {
    pub path: String,
    pub node_type: NodeType,
    pub size: u64,
    pub created_at: u64,
    pub modified_at: u64,
    pub permissions: Permissions,
}

/// Change observed by a [`DiskWatcher`], path relative to the
/// adapter's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub relative_path: String,
    pub kind: EventKind,
}

/// Pass-through backend for one mounted directory.
///
/// All paths are normalized and relative to the mount point (`/` for
/// the mount point itself). Errors are surfaced verbatim; the facade
/// does not retry disk I/O.
#[async_trait]
pub trait DiskAdapter: Send + Sync {
    /// Backend root location, persisted with the mount.
    fn root_path(&self) -> &str;

    async fn create_file(&self, rel: &str) -> Result<()>;

    async fn create_dir(&self, rel: &str) -> Result<()>;

    async fn read_file(&self, rel: &str, offset: u64, length: usize) -> Result<Vec<u8>>;

    async fn write_file(&self, rel: &str, offset: u64, data: &[u8]) -> Result<()>;

    /// Cuts (or zero-extends) a file to `size` bytes. Whole-file
    /// rewrites need it; backends without it reject shrinking writes.
    async fn truncate(&self, rel: &str, _size: u64) -> Result<()> {
        Err(VfsError::backend("backend does not support truncation").with_path(rel))
    }

    async fn delete(&self, rel: &str) -> Result<()>;

    async fn list(&self, rel: &str) -> Result<Vec<DirEntry>>;

    async fn stat(&self, rel: &str) -> Result<DiskStat>;

    async fn exists(&self, rel: &str) -> Result<bool>;

    async fn set_xattr(&self, rel: &str, _name: &str, _value: &[u8]) -> Result<()> {
        Err(VfsError::backend("backend does not support xattrs").with_path(rel))
    }

    async fn get_xattr(&self, rel: &str, _name: &str) -> Result<Vec<u8>> {
        Err(VfsError::backend("backend does not support xattrs").with_path(rel))
    }

    async fn list_xattrs(&self, rel: &str) -> Result<Vec<String>> {
        Err(VfsError::backend("backend does not support xattrs").with_path(rel))
    }

    async fn remove_xattr(&self, rel: &str, _name: &str) -> Result<()> {
        Err(VfsError::backend("backend does not support xattrs").with_path(rel))
    }

    /// Moves a node into the backend's `.trash` area under `trash_id`.
    /// The default simply deletes; such entries cannot be restored.
    async fn move_to_trash(&self, rel: &str, _trash_id: &str) -> Result<()> {
        self.delete(rel).await
    }

    /// Brings a node back from the backend's `.trash` area.
    async fn restore_from_trash(&self, _trash_id: &str, rel: &str) -> Result<()> {
        Err(VfsError::backend("backend does not support trash restore").with_path(rel))
    }

    /// External-change stream, if the backend can observe one.
    fn watcher(&self) -> Option<Box<dyn DiskWatcher>> {
        None
    }
}

/// Lazy stream of external changes under an adapter's root.
#[async_trait]
pub trait DiskWatcher: Send {
    /// Next observed change; `None` ends the stream and the bridge
    /// task with it.
    async fn next_event(&mut self) -> Option<WatchEvent>;
}

/// Watcher fed through a channel. Backends (and tests) push events via
/// the [`WatchFeed`] half.
pub struct ChannelWatcher {
    receiver: async_channel::Receiver<WatchEvent>,
}

/// Producer half of a [`ChannelWatcher`].
#[derive(Clone)]
pub struct WatchFeed {
    sender: async_channel::Sender<WatchEvent>,
}

impl ChannelWatcher {
    pub fn pair(capacity: usize) -> (WatchFeed, ChannelWatcher) {
        let (sender, receiver) = async_channel::bounded(capacity);
        (WatchFeed { sender }, ChannelWatcher { receiver })
    }
}

impl WatchFeed {
    /// Pushes one event; returns false once the watcher side is gone.
    pub fn push(&self, event: WatchEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    /// Closes the stream, ending the bridge task.
    pub fn close(&self) {
        self.sender.close();
    }
}

#[async_trait]
impl DiskWatcher for ChannelWatcher {
    async fn next_event(&mut self) -> Option<WatchEvent> {
        self.receiver.recv().await.ok()
    }
}
