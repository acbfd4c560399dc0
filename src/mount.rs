//! Mount table: longest-prefix routing between the memory tree and
//! pass-through disk backends.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::adapter::DiskAdapter;
use crate::error::{ErrorKind, Result, VfsError};
use crate::path;

/// Persisted form of a mount, enough to restore it as pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMount {
    pub virtual_path: String,
    pub root_path: String,
    pub read_only: bool,
}

/// An active mount serving I/O.
pub struct MountEntry {
    pub virtual_path: String,
    pub adapter: Arc<dyn DiskAdapter>,
    pub read_only: bool,
    /// Watcher bridge task, aborted on unmount.
    pub(crate) watcher_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for MountEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountEntry")
            .field("virtual_path", &self.virtual_path)
            .field("root_path", &self.adapter.root_path())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Insertion-ordered mount registry with a parallel pending set.
///
/// Pending mounts come back from persistence and surface via
/// [`MountTable::pending`] until the host supplies an adapter for the
/// same virtual path.
#[derive(Debug, Default)]
pub struct MountTable {
    active: Vec<MountEntry>,
    pending: Vec<PersistedMount>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        virtual_path: String,
        adapter: Arc<dyn DiskAdapter>,
        read_only: bool,
    ) -> Result<()> {
        if virtual_path == "/" {
            return Err(VfsError::new(ErrorKind::InvalidPath, "cannot mount over the root")
                .with_path("/"));
        }
        if self.active.iter().any(|entry| entry.virtual_path == virtual_path) {
            return Err(VfsError::new(ErrorKind::AlreadyExists, "path is already mounted")
                .with_path(virtual_path));
        }
        self.pending.retain(|pending| pending.virtual_path != virtual_path);
        self.active.push(MountEntry { virtual_path, adapter, read_only, watcher_task: None });
        Ok(())
    }

    pub fn remove(&mut self, virtual_path: &str) -> Result<MountEntry> {
        match self.active.iter().position(|entry| entry.virtual_path == virtual_path) {
            Some(index) => Ok(self.active.remove(index)),
            None => Err(VfsError::new(ErrorKind::NotMounted, "no mount at path")
                .with_path(virtual_path)),
        }
    }

    /// Forgets a pending mount without ever activating it.
    pub fn remove_pending(&mut self, virtual_path: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| pending.virtual_path != virtual_path);
        self.pending.len() != before
    }

    /// Longest-prefix match. Returns the entry and the path relative to
    /// the mount point (`/` for the mount point itself).
    pub fn match_path(&self, vpath: &str) -> Option<(&MountEntry, String)> {
        let entry = self
            .active
            .iter()
            .filter(|entry| path::is_within(vpath, &entry.virtual_path))
            .max_by_key(|entry| entry.virtual_path.len())?;
        let relative = if vpath == entry.virtual_path {
            "/".to_string()
        } else {
            vpath[entry.virtual_path.len()..].to_string()
        };
        Some((entry, relative))
    }

    /// Whether any active mount point lies at or below `vpath`.
    pub fn shadows(&self, vpath: &str) -> bool {
        self.active.iter().any(|entry| path::is_within(&entry.virtual_path, vpath))
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.active
    }

    pub fn entry_mut(&mut self, virtual_path: &str) -> Option<&mut MountEntry> {
        self.active.iter_mut().find(|entry| entry.virtual_path == virtual_path)
    }

    pub fn mount_points(&self) -> Vec<String> {
        self.active.iter().map(|entry| entry.virtual_path.clone()).collect()
    }

    pub fn pending(&self) -> &[PersistedMount] {
        &self.pending
    }

    pub fn set_pending(&mut self, pending: Vec<PersistedMount>) {
        self.pending = pending;
    }

    /// Active mounts first, then pending, for the mounts blob.
    pub fn to_persisted(&self) -> Vec<PersistedMount> {
        self.active
            .iter()
            .map(|entry| PersistedMount {
                virtual_path: entry.virtual_path.clone(),
                root_path: entry.adapter.root_path().to_string(),
                read_only: entry.read_only,
            })
            .chain(self.pending.iter().cloned())
            .collect()
    }
}
