//! Recursive operations, composed from the primitives.
//!
//! These release the coordinator lock between steps and are therefore
//! not transactional: a cancelled `copy_path`, `move_path` or
//! `delete_recursive` leaves the steps already taken in place.

use crate::error::{ErrorKind, Result, VfsError};
use crate::events::EventKind;
use crate::metrics::OpKind;
use crate::node::{NodeStat, NodeType};
use crate::path;
use crate::persist::wal::WalEntry;

use super::{Route, VirtualFileSystem};

impl VirtualFileSystem {
    /// Creates the directory and every missing ancestor.
    pub async fn create_dir_recursive(&self, raw: &str) -> Result<()> {
        self.measured(OpKind::CreateDir, async {
            let vpath = Self::normalize_abs(raw)?;
            let mut st = self.shared.state.lock().await;
            self.ensure_loaded(&mut st).await;
            if let Route::Mount(route) = Self::route_of(&st, &vpath) {
                route.deny_write(&vpath)?;
                // Walk down from the mount point, creating what is missing.
                let mut rel = String::from("/");
                for segment in path::segments(&route.relative) {
                    rel = path::join(&rel, segment);
                    if !route.adapter.exists(&rel).await? {
                        route.adapter.create_dir(&rel).await?;
                    }
                }
                self.invalidate_prefix(&vpath);
                return Ok(());
            }
            let created = st.tree.ensure_dir_path(&vpath)?;
            for dir in &created {
                self.invalidate(dir);
                self.log(&mut st, WalEntry::CreateDir { path: dir.clone() }).await?;
                self.publish(dir, EventKind::Created);
            }
            Ok(())
        })
        .await
    }

    /// Deletes a subtree bottom-up. Stops at the first failure.
    pub async fn delete_recursive(&self, raw: &str) -> Result<()> {
        self.measured(OpKind::Delete, async {
            let vpath = Self::normalize_abs(raw)?;
            let stat = self.lstat(&vpath).await?;
            if stat.node_type == NodeType::Directory {
                let children = self.read_dir(&vpath).await?;
                for child in children {
                    let child_path = path::join(&vpath, &child.name);
                    Box::pin(self.delete_recursive(&child_path)).await?;
                }
            }
            self.delete(&vpath).await
        })
        .await
    }

    /// Deep copy. Memory-to-memory subtrees copy in one step under the
    /// coordinator lock; anything touching a mount composes the
    /// primitive operations.
    pub async fn copy_path(&self, raw_from: &str, raw_to: &str) -> Result<()> {
        self.measured(OpKind::Copy, async {
            let from = Self::normalize_abs(raw_from)?;
            let to = Self::normalize_abs(raw_to)?;

            // Fast path: both sides in memory, no mount below the source.
            {
                let mut st = self.shared.state.lock().await;
                self.ensure_loaded(&mut st).await;
                let memory_only = matches!(Self::route_of(&st, &from), Route::Memory)
                    && matches!(Self::route_of(&st, &to), Route::Memory)
                    && !st.mounts.shadows(&from);
                if memory_only {
                    st.tree.copy(&from, &to)?;
                    self.invalidate_prefix(&to);
                    self.log(
                        &mut st,
                        WalEntry::Copy { from: from.clone(), to: to.clone() },
                    )
                    .await?;
                    self.publish(&to, EventKind::Created);
                    return Ok(());
                }
            }

            self.copy_composed(&from, &to).await
        })
        .await
    }

    async fn copy_composed(&self, from: &str, to: &str) -> Result<()> {
        let stat = self.lstat(from).await?;
        match stat.node_type {
            NodeType::File => {
                let data = self.read_all(from).await?;
                self.write_all(to, &data).await?;
                self.copy_xattrs_best_effort(from, to).await;
            }
            NodeType::Directory => {
                match self.create_dir(to).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                    Err(err) => return Err(err),
                }
                for child in self.read_dir(from).await? {
                    let child_from = path::join(from, &child.name);
                    let child_to = path::join(to, &child.name);
                    Box::pin(self.copy_composed(&child_from, &child_to)).await?;
                }
            }
            NodeType::Symlink => {
                let target = self.read_link(from).await?;
                self.create_symlink(to, &target).await?;
            }
        }
        Ok(())
    }

    async fn copy_xattrs_best_effort(&self, from: &str, to: &str) {
        let Ok(names) = self.list_xattrs(from).await else { return };
        for name in names {
            if let Ok(value) = self.get_xattr(from, &name).await {
                if let Err(err) = self.set_xattr(to, &name, &value).await {
                    tracing::debug!("xattr {name} not copied to {to}: {err}");
                }
            }
        }
    }

    /// Moves a node. Memory-to-memory is a rename that keeps node
    /// identity and migrates version history; anything else copies and
    /// then deletes.
    pub async fn move_path(&self, raw_from: &str, raw_to: &str) -> Result<()> {
        self.measured(OpKind::Move, async {
            let from = Self::normalize_abs(raw_from)?;
            let to = Self::normalize_abs(raw_to)?;

            {
                let mut st = self.shared.state.lock().await;
                self.ensure_loaded(&mut st).await;
                let memory_only = matches!(Self::route_of(&st, &from), Route::Memory)
                    && matches!(Self::route_of(&st, &to), Route::Memory)
                    && !st.mounts.shadows(&from);
                if memory_only {
                    if self.shared.locks.is_locked(&from) {
                        return Err(VfsError::locked(&from));
                    }
                    st.tree.rename(&from, &to)?;
                    st.versions.move_versions(&from, &to);
                    self.invalidate_prefix(&from);
                    self.invalidate_prefix(&to);
                    self.log(&mut st, WalEntry::Move { from: from.clone(), to: to.clone() })
                        .await?;
                    self.publish(&from, EventKind::Deleted);
                    self.publish(&to, EventKind::Created);
                    return Ok(());
                }
            }

            self.copy_composed(&from, &to).await?;
            Box::pin(self.delete_recursive(&from)).await?;
            Ok(())
        })
        .await
    }

    /// Depth-first search of the memory tree, never descending into
    /// active mount points.
    pub async fn find<F>(
        &self,
        raw: &str,
        max_depth: usize,
        predicate: F,
    ) -> Result<Vec<(String, NodeStat)>>
    where
        F: Fn(&str, &NodeStat) -> bool,
    {
        let vpath = Self::normalize_abs(raw)?;
        let mut st = self.shared.state.lock().await;
        self.ensure_loaded(&mut st).await;
        let exclude = st.mounts.mount_points();
        st.tree.find(&vpath, max_depth, &exclude, predicate)
    }
}
