//! Write-ahead logging, snapshots and tiered crash recovery.

pub mod snapshot;
pub mod wal;

use std::sync::Arc;

use crate::codec::{self, PersistenceCodec};
use crate::config::{StorageKeys, VfsConfig};
use crate::error::Result;
use crate::mount::PersistedMount;
use crate::store::BlobStore;
use crate::trash::TrashManager;
use crate::tree::VfsTree;
use crate::versions::VersionManager;

use snapshot::{snapshot_to_tree, tree_to_snapshot, SnapshotNode};
use wal::WalEntry;

/// Outcome of a load, surfaced to the caller.
///
/// Loading never fails: corruption downgrades the affected blob to an
/// empty default and leaves a note here.
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub recovery_warnings: Vec<String>,
}

/// Everything reconstructed from the store.
pub(crate) struct LoadedState {
    pub(crate) tree: VfsTree,
    pub(crate) pending_mounts: Vec<PersistedMount>,
    pub(crate) versions: VersionManager,
    pub(crate) trash: TrashManager,
    pub(crate) warnings: Vec<String>,
}

/// Owns the blob store and the write-ahead-log cadence.
pub struct PersistenceManager {
    store: Arc<dyn BlobStore>,
    codec: PersistenceCodec,
    keys: StorageKeys,
    auto_snapshot_every: u32,
    ops_since_snapshot: u32,
}

impl PersistenceManager {
    pub(crate) fn new(store: Arc<dyn BlobStore>, config: &VfsConfig) -> Self {
        Self {
            store,
            codec: PersistenceCodec::new(config.codec),
            keys: config.keys.clone(),
            auto_snapshot_every: config.auto_snapshot_every,
            ops_since_snapshot: 0,
        }
    }

    /// Appends one record to the log.
    ///
    /// Returns true when the auto-snapshot threshold is reached; the
    /// caller then invokes [`PersistenceManager::save_snapshot`] with
    /// the state it guards.
    pub(crate) async fn append_wal(&mut self, entry: &WalEntry) -> Result<bool> {
        let record = self.codec.encode_wal_record(entry);
        self.store.append(&self.keys.wal, &record).await?;
        self.ops_since_snapshot += 1;
        Ok(self.auto_snapshot_every > 0 && self.ops_since_snapshot >= self.auto_snapshot_every)
    }

    /// Writes snapshot, versions and trash (in that order, each via the
    /// atomic-write protocol), then truncates the log. Recovery
    /// tolerates a crash between any two of these steps.
    pub(crate) async fn save_snapshot(
        &mut self,
        tree: &VfsTree,
        versions: &VersionManager,
        trash: &TrashManager,
    ) -> Result<()> {
        let image = self.codec.encode_snapshot(&tree_to_snapshot(tree));
        self.write_atomic(&self.keys.snapshot.clone(), &image).await?;

        let versions_blob = self.codec.encode_versions(versions.table());
        self.write_atomic(&self.keys.versions.clone(), &versions_blob).await?;

        let trash_blob = self.codec.encode_trash(trash.entries());
        self.write_atomic(&self.keys.trash.clone(), &trash_blob).await?;

        self.store.write(&self.keys.wal, &[]).await?;
        self.ops_since_snapshot = 0;
        tracing::debug!("snapshot saved, log truncated");
        Ok(())
    }

    /// Persists the mount table. Mount changes are not logged; the
    /// blob is rewritten on every mount and unmount.
    pub(crate) async fn save_mounts(&self, mounts: &[PersistedMount]) -> Result<()> {
        let blob = self.codec.encode_mounts(mounts);
        self.write_atomic(&self.keys.mounts.clone(), &blob).await
    }

    /// Persists the trash store out of cadence. Mount-delegated
    /// deletions call this directly since no log record covers them.
    pub(crate) async fn save_trash(&self, entries: &[crate::trash::TrashEntry]) -> Result<()> {
        let blob = self.codec.encode_trash(entries);
        self.write_atomic(&self.keys.trash.clone(), &blob).await
    }

    /// Atomic write protocol: stage to `<key>.tmp`, read it back and
    /// verify its CRC, then promote to the primary key. A staging
    /// failure degrades to a direct write so the operation still lands.
    async fn write_atomic(&self, key: &str, blob: &[u8]) -> Result<()> {
        let tmp_key = StorageKeys::tmp(key);
        self.store.write(&tmp_key, blob).await?;

        let verified = match self.store.read(&tmp_key).await {
            Ok(Some(readback)) => codec::unframe_blob(&readback).is_ok(),
            _ => false,
        };

        if verified {
            self.store.write(key, blob).await?;
            self.store.delete(&tmp_key).await?;
        } else {
            tracing::warn!("staged blob for {key} failed verification, writing directly");
            self.store.write(key, blob).await?;
            if let Err(err) = self.store.delete(&tmp_key).await {
                tracing::warn!("could not remove staging blob {tmp_key}: {err}");
            }
        }
        Ok(())
    }

    /// Tiered load. Never fails; each blob independently degrades to
    /// its empty default with a recovery warning.
    ///
    /// Effective replay order: snapshot, then the log (trash records
    /// reconciled against the loaded trash store), then mounts into
    /// pending, then versions, then trash.
    pub(crate) async fn load(&mut self, config: &VfsConfig) -> LoadedState {
        let mut warnings = Vec::new();

        let root = self.load_snapshot(&mut warnings).await;
        let mut tree = match root {
            Some(root) => snapshot_to_tree(root, config.block_size, config.max_symlink_depth),
            None => VfsTree::new(config.block_size, config.max_symlink_depth),
        };

        let pending_mounts = match self.read_optional(&self.keys.mounts.clone(), &mut warnings).await
        {
            Some(blob) => match self.codec.decode_mounts(&blob) {
                Ok(mounts) => mounts,
                Err(err) => {
                    warnings.push(format!("mounts blob corrupt, starting with none: {err}"));
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let versions = match self.read_optional(&self.keys.versions.clone(), &mut warnings).await {
            Some(blob) => match self.codec.decode_versions(&blob) {
                Ok(table) => VersionManager::from_table(table, config.max_versions),
                Err(err) => {
                    warnings.push(format!("versions blob corrupt, starting empty: {err}"));
                    VersionManager::new(config.max_versions)
                }
            },
            None => VersionManager::new(config.max_versions),
        };

        let mut trash = match self.read_optional(&self.keys.trash.clone(), &mut warnings).await {
            Some(blob) => match self.codec.decode_trash(&blob) {
                Ok(entries) => {
                    TrashManager::from_entries(entries, config.trash_max_items, config.trash_max_bytes)
                }
                Err(err) => {
                    warnings.push(format!("trash blob corrupt, starting empty: {err}"));
                    TrashManager::new(config.trash_max_items, config.trash_max_bytes)
                }
            },
            None => TrashManager::new(config.trash_max_items, config.trash_max_bytes),
        };

        self.replay_wal(&mut tree, &mut trash, &mut warnings).await;

        for warning in &warnings {
            tracing::warn!("recovery: {warning}");
        }

        LoadedState { tree, pending_mounts, versions, trash, warnings }
    }

    async fn load_snapshot(&self, warnings: &mut Vec<String>) -> Option<SnapshotNode> {
        if let Some(blob) = self.read_optional(&self.keys.snapshot.clone(), warnings).await {
            match self.codec.decode_snapshot(&blob) {
                Ok(root) => return Some(root),
                Err(err) => warnings.push(format!("snapshot corrupt: {err}")),
            }
        }

        let tmp_key = StorageKeys::tmp(&self.keys.snapshot);
        if let Some(blob) = self.read_optional(&tmp_key, warnings).await {
            match self.codec.decode_snapshot(&blob) {
                Ok(root) => {
                    // Promote the staged copy so the next load finds it
                    // under the primary key.
                    if let Err(err) = self.store.write(&self.keys.snapshot, &blob).await {
                        warnings.push(format!("could not promote staged snapshot: {err}"));
                    } else if let Err(err) = self.store.delete(&tmp_key).await {
                        warnings.push(format!("could not remove staged snapshot: {err}"));
                    }
                    warnings.push("snapshot recovered from staging companion".to_string());
                    return Some(root);
                }
                Err(err) => warnings.push(format!("staged snapshot corrupt: {err}")),
            }
        }
        None
    }

    async fn replay_wal(
        &mut self,
        tree: &mut VfsTree,
        trash: &mut TrashManager,
        warnings: &mut Vec<String>,
    ) {
        let wal_key = self.keys.wal.clone();
        let blob = match self.read_optional(&wal_key, warnings).await {
            Some(blob) if !blob.is_empty() => blob,
            _ => return,
        };

        let decoded = self.codec.decode_wal(&blob);
        if decoded.truncated || decoded.skipped > 0 {
            warnings.push(format!(
                "log damaged: kept {} records, skipped {}, tail {}",
                decoded.entries.len(),
                decoded.skipped,
                if decoded.truncated { "lost" } else { "intact" },
            ));
            // Rewrite the surviving prefix so the damage cannot grow.
            let mut repaired = Vec::new();
            for entry in &decoded.entries {
                repaired.extend_from_slice(&self.codec.encode_wal_record(entry));
            }
            let result = if repaired.is_empty() {
                self.store.delete(&wal_key).await
            } else {
                self.store.write(&wal_key, &repaired).await
            };
            if let Err(err) = result {
                warnings.push(format!("could not rewrite damaged log: {err}"));
            }
        }

        for entry in &decoded.entries {
            match entry {
                WalEntry::MoveToTrash { path, trash_id } => {
                    if !trash.contains(trash_id) {
                        if let Ok(node) = tree.remove_subtree(path, false) {
                            let image = SnapshotNode::from_node(&node);
                            trash.insert_with_id(crate::trash::TrashEntry {
                                trash_id: trash_id.clone(),
                                original_path: path.clone(),
                                node_type: image.node_type,
                                deleted_at_ms: image.modified_at,
                                is_mounted: false,
                                node: Some(image),
                            });
                        }
                    } else {
                        let _ = tree.remove_subtree(path, false);
                    }
                }
                WalEntry::RestoreFromTrash { trash_id, path } => {
                    if trash.contains(trash_id) && !tree.exists(path) {
                        if let Ok(entry) = trash.take(trash_id) {
                            if let Some(image) = entry.node {
                                let _ = tree.ensure_dir_path(
                                    crate::path::parent(path).unwrap_or("/"),
                                );
                                let node = image.into_node(tree.block_size());
                                let _ = tree.graft(path, node);
                            }
                        }
                    }
                }
                other => tree.apply_wal(other),
            }
        }
        self.ops_since_snapshot = decoded.entries.len() as u32;
    }

    async fn read_optional(&self, key: &str, warnings: &mut Vec<String>) -> Option<Vec<u8>> {
        match self.store.read(key).await {
            Ok(blob) => blob,
            Err(err) => {
                warnings.push(format!("could not read blob {key}: {err}"));
                None
            }
        }
    }
}
