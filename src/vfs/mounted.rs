//! Mount lifecycle, the watcher bridge and trash routing.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::adapter::{DiskAdapter, DiskWatcher};
use crate::error::{ErrorKind, Result, VfsError};
use crate::events::{EventKind, FsEvent};
use crate::metrics::OpKind;
use crate::mount::PersistedMount;
use crate::node::NodeType;
use crate::path;
use crate::persist::snapshot::SnapshotNode;
use crate::persist::wal::WalEntry;
use crate::trash::{TrashEntry, TrashInfo};

use super::{Route, Shared, VirtualFileSystem};

impl VirtualFileSystem {
    /// Attaches an adapter at `raw`. The mount-point directory is
    /// created in the tree when missing, so its parent listing shows
    /// it. A pending mount restored for the same path is claimed.
    pub async fn mount(
        &self,
        raw: &str,
        adapter: Arc<dyn DiskAdapter>,
        read_only: bool,
    ) -> Result<()> {
        self.measured(OpKind::Mount, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;

            let created = st.tree.ensure_dir_path(&vpath)?;
            for dir in &created {
                self.log(&mut st, WalEntry::CreateDir { path: dir.clone() }).await?;
            }
            st.mounts.insert(vpath.clone(), adapter.clone(), read_only)?;

            if let Some(watcher) = adapter.watcher() {
                let task = spawn_watcher_bridge(
                    self.shared.clone(),
                    vpath.clone(),
                    adapter.clone(),
                    watcher,
                );
                if let Some(entry) = st.mounts.entry_mut(&vpath) {
                    entry.watcher_task = Some(task);
                }
            }

            let persisted = st.mounts.to_persisted();
            st.persist.save_mounts(&persisted).await?;
            self.invalidate_prefix(&vpath);
            Ok(())
        })
        .await
    }

    /// Detaches the adapter, cancelling its watcher bridge. The (now
    /// empty) mount-point directory stays in the tree.
    pub async fn unmount(&self, raw: &str) -> Result<()> {
        self.measured(OpKind::Mount, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            let mut entry = st.mounts.remove(&vpath)?;
            if let Some(task) = entry.watcher_task.take() {
                task.abort();
            }
            let persisted = st.mounts.to_persisted();
            st.persist.save_mounts(&persisted).await?;
            self.invalidate_prefix(&vpath);
            Ok(())
        })
        .await
    }

    /// Active mounts in mount order.
    pub async fn mounts(&self) -> Result<Vec<PersistedMount>> {
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        Ok(st
            .mounts
            .entries()
            .iter()
            .map(|entry| PersistedMount {
                virtual_path: entry.virtual_path.clone(),
                root_path: entry.adapter.root_path().to_string(),
                read_only: entry.read_only,
            })
            .collect())
    }

    /// Mounts restored from persistence that still await an adapter.
    pub async fn pending_mounts(&self) -> Result<Vec<PersistedMount>> {
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        Ok(st.mounts.pending().to_vec())
    }

    /// Forgets a restored mount instead of supplying an adapter for it.
    pub async fn discard_pending_mount(&self, raw: &str) -> Result<()> {
        let vpath = Self::normalize_abs(raw)?;
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        if !st.mounts.remove_pending(&vpath) {
            return Err(VfsError::new(ErrorKind::NotMounted, "no pending mount at path")
                .with_path(vpath));
        }
        let persisted = st.mounts.to_persisted();
        st.persist.save_mounts(&persisted).await
    }

    /// Reconciles a mount subtree with the disk: walks every file,
    /// captures a version for content that changed behind our back,
    /// invalidates caches and emits `Modified` events.
    ///
    /// The captured version is the content observed at scan time; the
    /// pre-change bytes are unknowable from user space.
    pub async fn sync(&self, raw: &str) -> Result<usize> {
        self.measured(OpKind::Sync, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            let route = match Self::route_of(&st, &vpath) {
                Route::Mount(route) => route,
                Route::Memory => {
                    return Err(
                        VfsError::new(ErrorKind::NotMounted, "sync needs a mounted path")
                            .with_path(vpath),
                    )
                }
            };

            let mut changed = 0;
            let mut stack = vec![route.relative.clone()];
            while let Some(rel) = stack.pop() {
                for entry in route.adapter.list(&rel).await? {
                    let child_rel = path::join(&path::normalize(&rel), &entry.name);
                    match entry.node_type {
                        NodeType::Directory => stack.push(child_rel),
                        NodeType::File => {
                            let full = virtual_path_of(&route.mount_path, &child_rel);
                            let stat = route.adapter.stat(&child_rel).await?;
                            let data = route
                                .adapter
                                .read_file(&child_rel, 0, stat.size as usize)
                                .await?;
                            if st.versions.latest(&full) != Some(data.as_slice()) {
                                st.versions.save_version(&full, &data);
                                self.publish(&full, EventKind::Modified);
                                changed += 1;
                            }
                        }
                        NodeType::Symlink => {}
                    }
                }
            }
            self.invalidate_prefix(&vpath);
            Ok(changed)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Trash
    // ------------------------------------------------------------------

    /// Moves a node (with its subtree) into the trash store.
    ///
    /// Memory nodes are captured in full; mount nodes are delegated to
    /// the adapter's `.trash` area with only metadata retained here.
    pub async fn move_to_trash(&self, raw: &str) -> Result<String> {
        self.measured(OpKind::Delete, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            if self.shared.locks.is_locked(&vpath) {
                return Err(VfsError::locked(&vpath));
            }
            let trash_id = match Self::route_of(&st, &vpath) {
                Route::Mount(route) => {
                    if route.relative == "/" {
                        return Err(VfsError::new(
                            ErrorKind::PermissionDenied,
                            "cannot trash an active mount point",
                        )
                        .with_path(vpath));
                    }
                    route.deny_write(&vpath)?;
                    let stat = route.adapter.stat(&route.relative).await?;
                    let trash_id = st.trash.reserve_id();
                    route.adapter.move_to_trash(&route.relative, &trash_id).await?;
                    st.trash.insert_with_id(TrashEntry {
                        trash_id: trash_id.clone(),
                        original_path: vpath.clone(),
                        node_type: stat.node_type,
                        deleted_at_ms: crate::node::now_ms(),
                        is_mounted: true,
                        node: None,
                    });
                    // Mount deletions are not logged; persist the
                    // metadata right away instead.
                    let entries = st.trash.entries().to_vec();
                    st.persist.save_trash(&entries).await?;
                    trash_id
                }
                Route::Memory => {
                    if st.mounts.shadows(&vpath) {
                        return Err(VfsError::new(
                            ErrorKind::PermissionDenied,
                            "subtree contains an active mount point",
                        )
                        .with_path(vpath));
                    }
                    let node = st.tree.remove_subtree(&vpath, true)?;
                    let image = SnapshotNode::from_node(&node);
                    let trash_id = st.trash.add(&vpath, image);
                    st.versions.remove_versions(&vpath);
                    self.invalidate_prefix(&vpath);
                    self.log(
                        &mut st,
                        WalEntry::MoveToTrash { path: vpath.clone(), trash_id: trash_id.clone() },
                    )
                    .await?;
                    trash_id
                }
            };
            self.invalidate_prefix(&vpath);
            self.publish(&vpath, EventKind::Deleted);
            Ok(trash_id)
        })
        .await
    }

    /// Restores a trash entry, to its original path or to `to`.
    pub async fn restore_from_trash(&self, trash_id: &str, to: Option<&str>) -> Result<String> {
        self.measured(OpKind::CreateFile, async {
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            let entry = st.trash.take(trash_id)?;
            let target = match to {
                Some(raw) => Self::normalize_abs(raw)?,
                None => entry.original_path.clone(),
            };

            let outcome: Result<()> = if entry.is_mounted {
                match Self::route_of(&st, &target) {
                    Route::Mount(route) => {
                        match route.deny_write(&target) {
                            Ok(()) => {
                                route
                                    .adapter
                                    .restore_from_trash(trash_id, &route.relative)
                                    .await
                            }
                            Err(err) => Err(err),
                        }
                    }
                    Route::Memory => Err(VfsError::new(
                        ErrorKind::NotMounted,
                        "trashed node belongs to a mount that is not active",
                    )
                    .with_path(target.clone())),
                }
            } else {
                self.restore_memory_entry(&mut st, &entry, trash_id, &target).await
            };

            if let Err(err) = outcome {
                // Failed restores must not lose the entry.
                st.trash.insert_with_id(entry);
                return Err(err);
            }
            self.invalidate_prefix(&target);
            self.publish(&target, EventKind::Created);
            Ok(target)
        })
        .await
    }

    /// Rebuilds a memory-originated entry in the tree; failures leave
    /// the caller to re-insert the entry.
    async fn restore_memory_entry(
        &self,
        st: &mut super::VfsState,
        entry: &TrashEntry,
        trash_id: &str,
        target: &str,
    ) -> Result<()> {
        if st.tree.exists(target) {
            return Err(VfsError::already_exists(target));
        }
        let image = entry
            .node
            .clone()
            .ok_or_else(|| VfsError::corrupted("trash entry has no content"))?;
        let parent = path::parent(target).unwrap_or("/").to_string();
        let created = st.tree.ensure_dir_path(&parent)?;
        for dir in &created {
            self.log(st, WalEntry::CreateDir { path: dir.clone() }).await?;
        }
        let node = image.into_node(self.shared.config.block_size);
        st.tree.graft(target, node)?;
        self.log(
            st,
            WalEntry::RestoreFromTrash { trash_id: trash_id.to_string(), path: target.to_string() },
        )
        .await
    }

    /// Newest-first trash listing.
    pub async fn list_trash(&self) -> Result<Vec<TrashInfo>> {
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        Ok(st.trash.list())
    }

    /// Drops one entry, or everything when `trash_id` is `None`.
    /// Mount-delegated bytes stay in the adapter's `.trash` area.
    pub async fn purge_trash(&self, trash_id: Option<&str>) -> Result<()> {
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        match trash_id {
            Some(id) => st.trash.purge(id)?,
            None => st.trash.purge_all(),
        }
        Ok(())
    }
}

fn virtual_path_of(mount_path: &str, relative: &str) -> String {
    let relative = path::normalize(relative);
    if relative == "/" {
        mount_path.to_string()
    } else {
        format!("{mount_path}{relative}")
    }
}

/// Forwards external-change notifications into the event bus,
/// invalidating caches and capturing a best-effort post-change version
/// on modifications. The task ends when the watcher stream does;
/// failures log and exit without touching the filesystem.
fn spawn_watcher_bridge(
    shared: Arc<Shared>,
    mount_path: String,
    adapter: Arc<dyn DiskAdapter>,
    mut watcher: Box<dyn DiskWatcher>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = watcher.next_event().await {
            let rel = path::normalize(&event.relative_path);
            let full = virtual_path_of(&mount_path, &rel);

            if event.kind == EventKind::Modified {
                if let Ok(stat) = adapter.stat(&rel).await {
                    if stat.node_type == NodeType::File {
                        if let Ok(data) = adapter.read_file(&rel, 0, stat.size as usize).await {
                            let mut st = shared.state.lock().await;
                            if st.loaded && st.versions.latest(&full) != Some(data.as_slice()) {
                                st.versions.save_version(&full, &data);
                            }
                        }
                    }
                }
            }

            shared.stat_cache.remove(&full);
            shared.readdir_cache.remove(&full);
            if let Some(parent) = path::parent(&full) {
                shared.readdir_cache.remove(parent);
            }
            shared.events.publish(FsEvent { path: full, kind: event.kind });
        }
        tracing::debug!("watcher bridge for {mount_path} ended");
    })
}
