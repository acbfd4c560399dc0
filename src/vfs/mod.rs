//! The facade: every public operation enters here, takes the
//! coordinator lock, routes between the memory tree and mounted
//! backends, and keeps the log, caches, versions, trash and event bus
//! coherent.

mod handles;
mod mounted;
mod recursive;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::adapter::DiskAdapter;
use crate::cache::PathCache;
use crate::config::VfsConfig;
use crate::error::{ErrorKind, Result, VfsError};
use crate::events::{EventBus, EventKind, EventStream, FsEvent};
use crate::flock::{FileLockManager, HandleId};
use crate::metrics::{MetricsCollector, MetricsSnapshot, OpKind};
use crate::mount::MountTable;
use crate::node::{DirEntry, NodeStat, NodeType, Permissions};
use crate::path;
use crate::persist::wal::WalEntry;
use crate::persist::{LoadResult, PersistenceManager};
use crate::store::BlobStore;
use crate::trash::TrashManager;
use crate::tree::VfsTree;
use crate::versions::{VersionInfo, VersionManager};

pub use handles::{FileHandle, OpenMode};

/// State guarded by the coordinator lock.
pub(super) struct VfsState {
    pub(super) loaded: bool,
    pub(super) load_warnings: Vec<String>,
    pub(super) tree: VfsTree,
    pub(super) mounts: MountTable,
    pub(super) persist: PersistenceManager,
    pub(super) versions: VersionManager,
    pub(super) trash: TrashManager,
    pub(super) next_handle_id: HandleId,
    pub(super) open_handles: HashMap<HandleId, (String, OpenMode)>,
}

/// Shared across clones of the facade and with watcher bridge tasks.
pub(super) struct Shared {
    pub(super) config: VfsConfig,
    pub(super) state: Mutex<VfsState>,
    pub(super) locks: FileLockManager,
    pub(super) metrics: MetricsCollector,
    pub(super) events: EventBus,
    pub(super) stat_cache: PathCache<NodeStat>,
    pub(super) readdir_cache: PathCache<Vec<DirEntry>>,
}

/// Where a normalized path routes to.
pub(super) enum Route {
    Memory,
    Mount(MountRoute),
}

pub(super) struct MountRoute {
    pub(super) adapter: Arc<dyn DiskAdapter>,
    pub(super) read_only: bool,
    pub(super) relative: String,
    pub(super) mount_path: String,
}

impl MountRoute {
    fn deny_write(&self, vpath: &str) -> Result<()> {
        if self.read_only {
            return Err(VfsError::new(
                ErrorKind::PermissionDenied,
                "mount is read-only",
            )
            .with_path(vpath));
        }
        Ok(())
    }
}

/// An embeddable, crash-safe virtual filesystem.
///
/// Clones share one filesystem. Every operation is serialized by a
/// single coordinator mutex; state loads lazily from the blob store on
/// first touch.
#[derive(Clone)]
pub struct VirtualFileSystem {
    pub(super) shared: Arc<Shared>,
}

impl VirtualFileSystem {
    pub fn new(store: Arc<dyn BlobStore>, config: VfsConfig) -> Self {
        let state = VfsState {
            loaded: false,
            load_warnings: Vec::new(),
            tree: VfsTree::new(config.block_size, config.max_symlink_depth),
            mounts: MountTable::new(),
            persist: PersistenceManager::new(store, &config),
            versions: VersionManager::new(config.max_versions),
            trash: TrashManager::new(config.trash_max_items, config.trash_max_bytes),
            next_handle_id: 1,
            open_handles: HashMap::new(),
        };
        let shared = Shared {
            state: Mutex::new(state),
            locks: FileLockManager::new(),
            metrics: MetricsCollector::new(),
            events: EventBus::new(config.event_buffer_capacity),
            stat_cache: PathCache::new(config.stat_cache_capacity),
            readdir_cache: PathCache::new(config.readdir_cache_capacity),
            config,
        };
        Self { shared: Arc::new(shared) }
    }

    /// Forces the lazy load and reports what recovery had to do.
    pub async fn load(&self) -> Result<LoadResult> {
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        Ok(LoadResult { recovery_warnings: st.load_warnings.clone() })
    }

    pub(super) async fn ensure_loaded(&self, st: &mut VfsState) {
        if st.loaded {
            return;
        }
        let loaded = st.persist.load(&self.shared.config).await;
        st.tree = loaded.tree;
        st.mounts.set_pending(loaded.pending_mounts);
        st.versions = loaded.versions;
        st.trash = loaded.trash;
        st.load_warnings = loaded.warnings;
        st.loaded = true;
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    pub(super) fn normalize_abs(path: &str) -> Result<String> {
        if !path.starts_with('/') {
            return Err(VfsError::invalid_path(path));
        }
        Ok(path::normalize(path))
    }

    pub(super) async fn measured<T>(
        &self,
        op: OpKind,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let mark = self.shared.metrics.begin(op);
        let result = fut.await;
        self.shared.metrics.end(mark, result.is_ok());
        result
    }

    pub(super) fn route_of(st: &VfsState, vpath: &str) -> Route {
        match st.mounts.match_path(vpath) {
            Some((entry, relative)) => Route::Mount(MountRoute {
                adapter: entry.adapter.clone(),
                read_only: entry.read_only,
                relative,
                mount_path: entry.virtual_path.clone(),
            }),
            None => Route::Memory,
        }
    }

    /// Drops `stat[path]`, `readdir[path]` and the parent's listing.
    pub(super) fn invalidate(&self, vpath: &str) {
        self.shared.stat_cache.remove(vpath);
        self.shared.readdir_cache.remove(vpath);
        if let Some(parent) = path::parent(vpath) {
            self.shared.readdir_cache.remove(parent);
        }
    }

    /// Subtree variant used by deletes, moves, unmounts and sync.
    pub(super) fn invalidate_prefix(&self, vpath: &str) {
        self.shared.stat_cache.remove_by_prefix(vpath);
        self.shared.readdir_cache.remove_by_prefix(vpath);
        if let Some(parent) = path::parent(vpath) {
            self.shared.readdir_cache.remove(parent);
        }
    }

    /// Appends to the log and snapshots when the cadence says so.
    pub(super) async fn log(&self, st: &mut VfsState, entry: WalEntry) -> Result<()> {
        if st.persist.append_wal(&entry).await? {
            let VfsState { persist, tree, versions, trash, .. } = st;
            persist.save_snapshot(tree, versions, trash).await?;
        }
        Ok(())
    }

    pub(super) fn publish(&self, vpath: &str, kind: EventKind) {
        self.shared.events.publish(FsEvent { path: vpath.to_string(), kind });
    }

    fn quota_check(&self, st: &VfsState, growth: u64) -> Result<()> {
        let quota = self.shared.config.quota_bytes;
        if quota >= 0 && st.tree.total_used_bytes() + growth > quota as u64 {
            return Err(VfsError::new(
                ErrorKind::QuotaExceeded,
                format!("quota of {quota} bytes exceeded"),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Namespace operations
    // ------------------------------------------------------------------

    pub async fn create_file(&self, raw: &str) -> Result<()> {
        self.measured(OpKind::CreateFile, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    route.deny_write(&vpath)?;
                    route.adapter.create_file(&route.relative).await?;
                }
                Route::Memory => {
                    st.tree.create_file(&vpath)?;
                    self.invalidate(&vpath);
                    self.log(&mut st, WalEntry::CreateFile { path: vpath.clone() }).await?;
                }
            }
            self.invalidate(&vpath);
            self.publish(&vpath, EventKind::Created);
            Ok(())
        })
        .await
    }

    pub async fn create_dir(&self, raw: &str) -> Result<()> {
        self.measured(OpKind::CreateDir, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    route.deny_write(&vpath)?;
                    route.adapter.create_dir(&route.relative).await?;
                }
                Route::Memory => {
                    st.tree.create_dir(&vpath)?;
                    self.invalidate(&vpath);
                    self.log(&mut st, WalEntry::CreateDir { path: vpath.clone() }).await?;
                }
            }
            self.invalidate(&vpath);
            self.publish(&vpath, EventKind::Created);
            Ok(())
        })
        .await
    }

    /// The target is stored verbatim; it resolves on access, relative
    /// targets against the link's parent. Symlinks cannot be created
    /// inside mount points.
    pub async fn create_symlink(&self, raw: &str, target: &str) -> Result<()> {
        self.measured(OpKind::CreateSymlink, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            if let Route::Mount(_) = Self::route_of(&st, &vpath) {
                return Err(VfsError::new(
                    ErrorKind::PermissionDenied,
                    "symlinks are not supported inside mount points",
                )
                .with_path(vpath));
            }
            st.tree.create_symlink(&vpath, target)?;
            self.invalidate(&vpath);
            self.log(
                &mut st,
                WalEntry::CreateSymlink { path: vpath.clone(), target: target.to_string() },
            )
            .await?;
            self.publish(&vpath, EventKind::Created);
            Ok(())
        })
        .await
    }

    /// Deletes a file, symlink or empty directory. A path held by any
    /// advisory lock returns `Locked`; a mounted mount point cannot be
    /// deleted.
    pub async fn delete(&self, raw: &str) -> Result<()> {
        self.measured(OpKind::Delete, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            if self.shared.locks.is_locked(&vpath) {
                return Err(VfsError::locked(&vpath));
            }
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    if route.relative == "/" {
                        return Err(VfsError::new(
                            ErrorKind::PermissionDenied,
                            "cannot delete an active mount point",
                        )
                        .with_path(vpath));
                    }
                    route.deny_write(&vpath)?;
                    route.adapter.delete(&route.relative).await?;
                }
                Route::Memory => {
                    st.tree.delete(&vpath)?;
                    st.versions.remove_versions(&vpath);
                    self.invalidate_prefix(&vpath);
                    self.log(&mut st, WalEntry::Delete { path: vpath.clone() }).await?;
                }
            }
            self.invalidate_prefix(&vpath);
            self.publish(&vpath, EventKind::Deleted);
            Ok(())
        })
        .await
    }

    pub async fn exists(&self, raw: &str) -> Result<bool> {
        let vpath = Self::normalize_abs(raw)?;
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        match Self::route_of(&st, &vpath) {
            Route::Mount(route) => route.adapter.exists(&route.relative).await,
            Route::Memory => Ok(st.tree.resolve(&vpath, false).is_ok()),
        }
    }

    /// Metadata, following symlinks.
    pub async fn stat(&self, raw: &str) -> Result<NodeStat> {
        self.measured(OpKind::Stat, async {
            let vpath = Self::normalize_abs(raw)?;
            if let Some(hit) = self.shared.stat_cache.get(&vpath) {
                return Ok(hit);
            }
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            let stat = match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    disk_stat_to_node_stat(&vpath, route.adapter.stat(&route.relative).await?)
                }
                Route::Memory => st.tree.stat(&vpath)?,
            };
            self.shared.stat_cache.put(vpath, stat.clone());
            Ok(stat)
        })
        .await
    }

    /// Metadata of the node itself; a final symlink is reported with
    /// its target populated, not followed.
    pub async fn lstat(&self, raw: &str) -> Result<NodeStat> {
        self.measured(OpKind::Stat, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => Ok(disk_stat_to_node_stat(
                    &vpath,
                    route.adapter.stat(&route.relative).await?,
                )),
                Route::Memory => st.tree.lstat(&vpath),
            }
        })
        .await
    }

    pub async fn read_dir(&self, raw: &str) -> Result<Vec<DirEntry>> {
        self.measured(OpKind::ReadDir, async {
            let vpath = Self::normalize_abs(raw)?;
            if let Some(hit) = self.shared.readdir_cache.get(&vpath) {
                return Ok(hit);
            }
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            let entries = match Self::route_of(&st, &vpath) {
                Route::Mount(route) => route.adapter.list(&route.relative).await?,
                Route::Memory => st.tree.read_dir(&vpath)?,
            };
            self.shared.readdir_cache.put(vpath, entries.clone());
            Ok(entries)
        })
        .await
    }

    pub async fn read_link(&self, raw: &str) -> Result<String> {
        self.measured(OpKind::Stat, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(_) => Err(VfsError::new(ErrorKind::InvalidPath, "not a symlink")
                    .with_path(vpath)),
                Route::Memory => st.tree.read_link(&vpath),
            }
        })
        .await
    }

    pub async fn set_permissions(&self, raw: &str, permissions: Permissions) -> Result<()> {
        self.measured(OpKind::SetPermissions, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    route.deny_write(&vpath)?;
                    return Err(VfsError::backend(
                        "backend does not support permission changes",
                    )
                    .with_path(vpath));
                }
                Route::Memory => {
                    st.tree.set_permissions(&vpath, permissions)?;
                    self.invalidate(&vpath);
                    self.log(
                        &mut st,
                        WalEntry::SetPermissions { path: vpath.clone(), permissions },
                    )
                    .await?;
                }
            }
            self.publish(&vpath, EventKind::Modified);
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Data operations
    // ------------------------------------------------------------------

    pub async fn read_at(&self, raw: &str, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.measured(OpKind::Read, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            let data = match Self::route_of(&st, &vpath) {
                Route::Mount(route) => route.adapter.read_file(&route.relative, offset, length).await?,
                Route::Memory => st.tree.read_at(&vpath, offset, length)?,
            };
            self.shared.metrics.add_bytes_read(data.len() as u64);
            Ok(data)
        })
        .await
    }

    pub async fn read_all(&self, raw: &str) -> Result<Vec<u8>> {
        self.measured(OpKind::Read, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            let data = match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    let stat = route.adapter.stat(&route.relative).await?;
                    if stat.node_type != NodeType::File {
                        return Err(VfsError::not_file(&vpath));
                    }
                    route.adapter.read_file(&route.relative, 0, stat.size as usize).await?
                }
                Route::Memory => {
                    let resolved = st.tree.resolve(&vpath, true)?;
                    let size = st.tree.stat(&resolved)?.size;
                    st.tree.read_at(&vpath, 0, size as usize)?
                }
            };
            self.shared.metrics.add_bytes_read(data.len() as u64);
            Ok(data)
        })
        .await
    }

    /// Writes at an offset, growing the file as needed. On memory
    /// paths the prior content is captured as a version (unless this
    /// is a byte-identical full overwrite) and the quota is enforced
    /// before anything mutates.
    pub async fn write_at(&self, raw: &str, offset: u64, data: &[u8]) -> Result<()> {
        self.measured(OpKind::Write, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    route.deny_write(&vpath)?;
                    route.adapter.write_file(&route.relative, offset, data).await?;
                }
                Route::Memory => {
                    let resolved = st.tree.resolve(&vpath, true)?;
                    if !st.tree.stat(&resolved)?.permissions.write {
                        return Err(VfsError::permission_denied(&vpath));
                    }
                    let current = st.tree.peek_content(&vpath)?;
                    let end = offset + data.len() as u64;
                    let growth = end.saturating_sub(current.len() as u64);
                    self.quota_check(&st, growth)?;
                    let identical = offset == 0
                        && data.len() == current.len()
                        && data == current.as_slice();
                    if !current.is_empty() && !identical {
                        st.versions.save_version(&vpath, &current);
                    }
                    st.tree.write_at(&vpath, offset, data)?;
                    self.invalidate(&vpath);
                    self.log(
                        &mut st,
                        WalEntry::Write { path: vpath.clone(), offset, data: data.to_vec() },
                    )
                    .await?;
                }
            }
            self.shared.metrics.add_bytes_written(data.len() as u64);
            self.invalidate(&vpath);
            self.publish(&vpath, EventKind::Modified);
            Ok(())
        })
        .await
    }

    /// Replaces the whole content, creating the file when missing.
    pub async fn write_all(&self, raw: &str, data: &[u8]) -> Result<()> {
        self.measured(OpKind::Write, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    route.deny_write(&vpath)?;
                    let current = match route.adapter.stat(&route.relative).await {
                        Ok(stat) if stat.node_type == NodeType::File => route
                            .adapter
                            .read_file(&route.relative, 0, stat.size as usize)
                            .await
                            .unwrap_or_default(),
                        _ => Vec::new(),
                    };
                    if !current.is_empty() && current != data {
                        st.versions.save_version(&vpath, &current);
                    }
                    route.adapter.write_file(&route.relative, 0, data).await?;
                    if data.len() < current.len() {
                        route.adapter.truncate(&route.relative, data.len() as u64).await?;
                    }
                }
                Route::Memory => {
                    self.replace_memory_file(&mut st, &vpath, data, true).await?;
                }
            }
            self.shared.metrics.add_bytes_written(data.len() as u64);
            self.invalidate(&vpath);
            self.publish(&vpath, EventKind::Modified);
            Ok(())
        })
        .await
    }

    /// Appends to the end of the file.
    pub async fn append(&self, raw: &str, data: &[u8]) -> Result<()> {
        let size = match self.stat(raw).await {
            Ok(stat) => stat.size,
            Err(err) if err.kind() == ErrorKind::NotFound => 0,
            Err(err) => return Err(err),
        };
        if size == 0 && !self.exists(raw).await? {
            return self.write_all(raw, data).await;
        }
        self.write_at(raw, size, data).await
    }

    pub async fn truncate(&self, raw: &str, size: u64) -> Result<()> {
        self.measured(OpKind::Write, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    route.deny_write(&vpath)?;
                    route.adapter.truncate(&route.relative, size).await?;
                }
                Route::Memory => {
                    let current = st.tree.peek_content(&vpath)?;
                    if size == current.len() as u64 {
                        return Ok(());
                    }
                    let mut resized = current.clone();
                    resized.resize(size as usize, 0);
                    self.quota_check(&st, size.saturating_sub(current.len() as u64))?;
                    if !current.is_empty() {
                        st.versions.save_version(&vpath, &current);
                    }
                    self.replace_memory_file(&mut st, &vpath, &resized, false).await?;
                }
            }
            self.invalidate(&vpath);
            self.publish(&vpath, EventKind::Modified);
            Ok(())
        })
        .await
    }

    /// Whole-file replacement on a memory path: quota, optional
    /// version capture, tree mutation and logging.
    ///
    /// A shrinking rewrite is logged as delete + recreate (with
    /// permissions and xattrs restored) so replay can never leave a
    /// stale tail behind.
    pub(super) async fn replace_memory_file(
        &self,
        st: &mut VfsState,
        vpath: &str,
        data: &[u8],
        capture_version: bool,
    ) -> Result<()> {
        let current = match st.tree.peek_content(vpath) {
            Ok(content) => Some(content),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };
        if current.is_some() {
            let resolved = st.tree.resolve(vpath, true)?;
            if !st.tree.stat(&resolved)?.permissions.write {
                return Err(VfsError::permission_denied(vpath));
            }
        }
        let old_len = current.as_ref().map_or(0, Vec::len);
        let growth = (data.len() as u64).saturating_sub(old_len as u64);
        self.quota_check(st, growth)?;

        if capture_version {
            if let Some(current) = &current {
                if !current.is_empty() && current.as_slice() != data {
                    st.versions.save_version(vpath, current);
                }
            }
        }

        if current.is_none() {
            st.tree.create_file(vpath)?;
        }
        st.tree.write_at(vpath, 0, data)?;
        let shrunk = data.len() < old_len;
        if shrunk {
            st.tree.truncate(vpath, data.len() as u64)?;
        }
        self.invalidate(vpath);

        if current.is_none() {
            self.log(st, WalEntry::CreateFile { path: vpath.to_string() }).await?;
        } else if shrunk {
            let resolved = st.tree.resolve(vpath, true)?;
            let stat = st.tree.stat(&resolved)?;
            let xattrs: Vec<(String, Vec<u8>)> = st
                .tree
                .list_xattrs(&resolved)?
                .into_iter()
                .filter_map(|name| {
                    st.tree.get_xattr(&resolved, &name).ok().map(|value| (name, value))
                })
                .collect();
            self.log(st, WalEntry::Delete { path: vpath.to_string() }).await?;
            self.log(st, WalEntry::CreateFile { path: vpath.to_string() }).await?;
            self.log(
                st,
                WalEntry::SetPermissions {
                    path: vpath.to_string(),
                    permissions: stat.permissions,
                },
            )
            .await?;
            for (name, value) in xattrs {
                self.log(st, WalEntry::SetXattr { path: vpath.to_string(), name, value })
                    .await?;
            }
        }
        self.log(
            st,
            WalEntry::Write { path: vpath.to_string(), offset: 0, data: data.to_vec() },
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Extended attributes
    // ------------------------------------------------------------------

    pub async fn set_xattr(&self, raw: &str, name: &str, value: &[u8]) -> Result<()> {
        self.measured(OpKind::Xattr, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    route.deny_write(&vpath)?;
                    route.adapter.set_xattr(&route.relative, name, value).await?;
                }
                Route::Memory => {
                    st.tree.set_xattr(&vpath, name, value.to_vec())?;
                    self.invalidate(&vpath);
                    self.log(
                        &mut st,
                        WalEntry::SetXattr {
                            path: vpath.clone(),
                            name: name.to_string(),
                            value: value.to_vec(),
                        },
                    )
                    .await?;
                }
            }
            self.invalidate(&vpath);
            self.publish(&vpath, EventKind::Modified);
            Ok(())
        })
        .await
    }

    pub async fn get_xattr(&self, raw: &str, name: &str) -> Result<Vec<u8>> {
        self.measured(OpKind::Xattr, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => route.adapter.get_xattr(&route.relative, name).await,
                Route::Memory => st.tree.get_xattr(&vpath, name),
            }
        })
        .await
    }

    pub async fn list_xattrs(&self, raw: &str) -> Result<Vec<String>> {
        self.measured(OpKind::Xattr, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => route.adapter.list_xattrs(&route.relative).await,
                Route::Memory => st.tree.list_xattrs(&vpath),
            }
        })
        .await
    }

    pub async fn remove_xattr(&self, raw: &str, name: &str) -> Result<()> {
        self.measured(OpKind::Xattr, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    route.deny_write(&vpath)?;
                    route.adapter.remove_xattr(&route.relative, name).await?;
                }
                Route::Memory => {
                    st.tree.remove_xattr(&vpath, name)?;
                    self.invalidate(&vpath);
                    self.log(
                        &mut st,
                        WalEntry::RemoveXattr { path: vpath.clone(), name: name.to_string() },
                    )
                    .await?;
                }
            }
            self.invalidate(&vpath);
            self.publish(&vpath, EventKind::Modified);
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Versions
    // ------------------------------------------------------------------

    /// Retained versions of a path, newest first.
    pub async fn versions(&self, raw: &str) -> Result<Vec<VersionInfo>> {
        let vpath = Self::normalize_abs(raw)?;
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        Ok(st.versions.list(&vpath))
    }

    pub async fn read_version(&self, raw: &str, version_id: &str) -> Result<Vec<u8>> {
        let vpath = Self::normalize_abs(raw)?;
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        st.versions.read_version(&vpath, version_id)
    }

    /// Brings a historical version back as the current content. The
    /// replaced content is saved as a new version first; the restored
    /// record leaves the history.
    pub async fn restore_version(&self, raw: &str, version_id: &str) -> Result<()> {
        self.measured(OpKind::Write, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    route.deny_write(&vpath)?;
                    let current = match route.adapter.stat(&route.relative).await {
                        Ok(stat) if stat.node_type == NodeType::File => route
                            .adapter
                            .read_file(&route.relative, 0, stat.size as usize)
                            .await
                            .unwrap_or_default(),
                        _ => Vec::new(),
                    };
                    let historical =
                        st.versions.restore_version(&vpath, version_id, &current)?;
                    route.adapter.write_file(&route.relative, 0, &historical).await?;
                    if historical.len() < current.len() {
                        route
                            .adapter
                            .truncate(&route.relative, historical.len() as u64)
                            .await?;
                    }
                }
                Route::Memory => {
                    let current = match st.tree.peek_content(&vpath) {
                        Ok(content) => content,
                        Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
                        Err(err) => return Err(err),
                    };
                    let historical =
                        st.versions.restore_version(&vpath, version_id, &current)?;
                    self.replace_memory_file(&mut st, &vpath, &historical, false).await?;
                }
            }
            self.invalidate(&vpath);
            self.publish(&vpath, EventKind::Modified);
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    /// Subscribes to events at `raw` and in its subtree.
    pub async fn watch(&self, raw: &str) -> Result<EventStream> {
        let vpath = Self::normalize_abs(raw)?;
        Ok(self.shared.events.watch(&vpath))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Forces a snapshot of everything, truncating the log.
    pub async fn flush(&self) -> Result<()> {
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        let persisted = st.mounts.to_persisted();
        let VfsState { persist, tree, versions, trash, .. } = &mut *st;
        persist.save_snapshot(tree, versions, trash).await?;
        persist.save_mounts(&persisted).await
    }

    /// Cancels watcher bridges and takes a final snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut st = self.shared.state.lock().await;
            if !st.loaded {
                return Ok(());
            }
            for vpath in st.mounts.mount_points() {
                if let Some(entry) = st.mounts.entry_mut(&vpath) {
                    if let Some(task) = entry.watcher_task.take() {
                        task.abort();
                    }
                }
            }
        }
        self.flush().await
    }
}

pub(super) fn disk_stat_to_node_stat(vpath: &str, stat: crate::adapter::DiskStat) -> NodeStat {
    NodeStat {
        path: vpath.to_string(),
        node_type: stat.node_type,
        size: stat.size,
        created_at: stat.created_at,
        modified_at: stat.modified_at,
        permissions: stat.permissions,
        target: None,
    }
}
