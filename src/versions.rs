//! Bounded per-path version history.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, VfsError};
use crate::node::now_ms;
use crate::path;

/// Persisted shape of the version store: path to newest-first records,
/// insertion-ordered for deterministic encoding.
pub type VersionTable = IndexMap<String, Vec<VersionRecord>>;

/// One retained snapshot of a file's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Monotonic `v<N>` identifier, unique across all paths.
    pub version_id: String,
    pub timestamp_ms: u64,
    pub data: Vec<u8>,
}

/// Listing entry; the content stays in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version_id: String,
    pub timestamp_ms: u64,
    pub size: u64,
}

/// Keeps the last `max_versions` content snapshots per path,
/// newest first.
#[derive(Debug)]
pub struct VersionManager {
    max_versions: usize,
    next_id: u64,
    table: VersionTable,
}

impl VersionManager {
    pub fn new(max_versions: usize) -> Self {
        Self { max_versions, next_id: 1, table: VersionTable::new() }
    }

    /// Rebuilds from persisted records, re-syncing the id counter past
    /// every restored id so future assignments never collide.
    pub fn from_table(table: VersionTable, max_versions: usize) -> Self {
        let max_seen = table
            .values()
            .flatten()
            .filter_map(|record| record.version_id.strip_prefix('v'))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self { max_versions, next_id: max_seen + 1, table }
    }

    pub fn table(&self) -> &VersionTable {
        &self.table
    }

    /// Prepends a snapshot of `data`, dropping the oldest past the cap.
    /// Empty content is never versioned. Returns the assigned id.
    pub fn save_version(&mut self, vpath: &str, data: &[u8]) -> Option<String> {
        if data.is_empty() {
            return None;
        }
        let version_id = format!("v{}", self.next_id);
        self.next_id += 1;
        let records = self.table.entry(vpath.to_string()).or_default();
        records.insert(
            0,
            VersionRecord {
                version_id: version_id.clone(),
                timestamp_ms: now_ms(),
                data: data.to_vec(),
            },
        );
        records.truncate(self.max_versions);
        Some(version_id)
    }

    /// Newest content on record for the path, if any.
    pub fn latest(&self, vpath: &str) -> Option<&[u8]> {
        self.table.get(vpath).and_then(|records| records.first()).map(|r| r.data.as_slice())
    }

    pub fn list(&self, vpath: &str) -> Vec<VersionInfo> {
        self.table
            .get(vpath)
            .map(|records| {
                records
                    .iter()
                    .map(|record| VersionInfo {
                        version_id: record.version_id.clone(),
                        timestamp_ms: record.timestamp_ms,
                        size: record.data.len() as u64,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn read_version(&self, vpath: &str, version_id: &str) -> Result<Vec<u8>> {
        self.table
            .get(vpath)
            .and_then(|records| records.iter().find(|r| r.version_id == version_id))
            .map(|record| record.data.clone())
            .ok_or_else(|| {
                VfsError::new(ErrorKind::NotFound, "no such version").with_path(vpath)
            })
    }

    /// Saves `current` as a fresh version, removes the restored record
    /// from history and hands back its bytes for the caller to write.
    pub fn restore_version(
        &mut self,
        vpath: &str,
        version_id: &str,
        current: &[u8],
    ) -> Result<Vec<u8>> {
        let historical = self.read_version(vpath, version_id)?;
        self.save_version(vpath, current);
        if let Some(records) = self.table.get_mut(vpath) {
            records.retain(|record| record.version_id != version_id);
        }
        Ok(historical)
    }

    /// Migrates history when a file or subtree moves.
    pub fn move_versions(&mut self, from: &str, to: &str) {
        let keys: Vec<String> =
            self.table.keys().filter(|key| path::is_within(key, from)).cloned().collect();
        for key in keys {
            if let Some(records) = self.table.shift_remove(&key) {
                let suffix = &key[from.len()..];
                self.table.insert(format!("{to}{suffix}"), records);
            }
        }
    }

    /// Drops history for a path and everything beneath it.
    pub fn remove_versions(&mut self, vpath: &str) {
        self.table.retain(|key, _| !path::is_within(key, vpath));
    }
}
