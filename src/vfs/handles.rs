//! File handles and the advisory-lock surface.

use crate::error::{ErrorKind, Result, VfsError};
use crate::flock::{HandleId, LockType};
use crate::node::NodeType;

use super::{Route, VirtualFileSystem};

/// Access requested when opening a handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    fn allows_read(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    fn allows_write(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// An open file, the unit of advisory-lock ownership.
///
/// Handles are plain data; closing one releases every lock it holds.
/// Ids are session-scoped and never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    id: HandleId,
    path: String,
    mode: OpenMode,
}

impl FileHandle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }
}

impl VirtualFileSystem {
    /// Opens a handle on an existing file.
    pub async fn open(&self, raw: &str, mode: OpenMode) -> Result<FileHandle> {
        let vpath = Self::normalize_abs(raw)?;
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        let stat = match Self::route_of(&st, &vpath) {
            Route::Mount(route) => {
                super::disk_stat_to_node_stat(&vpath, route.adapter.stat(&route.relative).await?)
            }
            Route::Memory => st.tree.stat(&vpath)?,
        };
        if stat.node_type != NodeType::File {
            return Err(VfsError::not_file(&vpath));
        }
        if mode.allows_read() && !stat.permissions.read {
            return Err(VfsError::permission_denied(&vpath));
        }
        if mode.allows_write() && !stat.permissions.write {
            return Err(VfsError::permission_denied(&vpath));
        }
        let id = st.next_handle_id;
        st.next_handle_id += 1;
        st.open_handles.insert(id, (vpath.clone(), mode));
        Ok(FileHandle { id, path: vpath, mode })
    }

    /// Closes a handle, releasing all of its locks. Closing twice is a
    /// no-op.
    pub async fn close(&self, handle: &FileHandle) -> Result<()> {
        {
            let mut st = self.shared.state.lock().await;
            st.open_handles.remove(&handle.id);
        }
        self.shared.locks.unlock_all(handle.id);
        Ok(())
    }

    /// Reads through a handle; the handle must allow reading.
    pub async fn read_with(&self, handle: &FileHandle, offset: u64, length: usize) -> Result<Vec<u8>> {
        if !handle.mode.allows_read() {
            return Err(VfsError::permission_denied(handle.path()));
        }
        self.verify_open(handle).await?;
        self.read_at(&handle.path, offset, length).await
    }

    /// Writes through a handle. Fails `Locked` when another handle
    /// holds a lock on the path.
    pub async fn write_with(&self, handle: &FileHandle, offset: u64, data: &[u8]) -> Result<()> {
        if !handle.mode.allows_write() {
            return Err(VfsError::permission_denied(handle.path()));
        }
        self.verify_open(handle).await?;
        if self.shared.locks.is_locked_by_other(&handle.path, handle.id) {
            return Err(VfsError::locked(handle.path()));
        }
        self.write_at(&handle.path, offset, data).await
    }

    /// Non-blocking lock acquisition; `Locked` on conflict.
    pub async fn try_lock(&self, handle: &FileHandle, lock_type: LockType) -> Result<()> {
        self.verify_open(handle).await?;
        self.shared.locks.try_lock(&handle.path, handle.id, lock_type)
    }

    /// Blocks until the lock can be granted.
    ///
    /// The coordinator lock is only held for the handle check; the
    /// suspension itself parks on the lock manager, so concurrent
    /// operations (including `delete` on the same path) proceed.
    pub async fn lock(&self, handle: &FileHandle, lock_type: LockType) -> Result<()> {
        self.verify_open(handle).await?;
        // Coordinator released here; park on the lock table alone.
        self.shared.locks.lock(&handle.path, handle.id, lock_type).await;
        Ok(())
    }

    pub async fn unlock(&self, handle: &FileHandle) -> Result<()> {
        self.shared.locks.unlock(&handle.path, handle.id);
        Ok(())
    }

    /// Whether any handle currently holds a lock on the path.
    pub async fn is_locked(&self, raw: &str) -> Result<bool> {
        let vpath = Self::normalize_abs(raw)?;
        Ok(self.shared.locks.is_locked(&vpath))
    }

    async fn verify_open(&self, handle: &FileHandle) -> Result<()> {
        let st = self.shared.state.lock().await;
        match st.open_handles.get(&handle.id) {
            Some((path, _)) if *path == handle.path => Ok(()),
            _ => Err(VfsError::new(ErrorKind::Unknown, "handle is not open")
                .with_path(handle.path())),
        }
    }

    /// Counts currently open handles; diagnostics.
    pub async fn open_handle_count(&self) -> usize {
        self.shared.state.lock().await.open_handles.len()
    }
}
