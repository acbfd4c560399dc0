//! Bounded trash store.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result, VfsError};
use crate::node::{now_ms, NodeType};
use crate::persist::snapshot::SnapshotNode;

/// One trashed node.
///
/// Memory-originated entries carry the full subtree; mount-originated
/// entries carry metadata only, the bytes live in the adapter's
/// `.trash` area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrashEntry {
    /// Monotonic `trash_<N>` identifier.
    pub trash_id: String,
    pub original_path: String,
    pub node_type: NodeType,
    pub deleted_at_ms: u64,
    pub is_mounted: bool,
    pub node: Option<SnapshotNode>,
}

impl TrashEntry {
    pub fn byte_size(&self) -> u64 {
        self.node.as_ref().map_or(0, SnapshotNode::total_file_bytes)
    }
}

/// Listing entry returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrashInfo {
    pub trash_id: String,
    pub original_path: String,
    pub node_type: NodeType,
    pub deleted_at_ms: u64,
    pub is_mounted: bool,
    pub bytes: u64,
}

/// Newest-first store bounded by entry count and total bytes;
/// the oldest entries are evicted first.
#[derive(Debug)]
pub struct TrashManager {
    max_items: usize,
    max_bytes: u64,
    next_id: u64,
    entries: Vec<TrashEntry>,
    total_bytes: u64,
}

impl TrashManager {
    pub fn new(max_items: usize, max_bytes: u64) -> Self {
        Self { max_items, max_bytes, next_id: 1, entries: Vec::new(), total_bytes: 0 }
    }

    /// Rebuilds from persisted entries; the id counter lands strictly
    /// past the maximum observed id.
    pub fn from_entries(entries: Vec<TrashEntry>, max_items: usize, max_bytes: u64) -> Self {
        let max_seen = entries
            .iter()
            .filter_map(|entry| entry.trash_id.strip_prefix("trash_"))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        let total_bytes = entries.iter().map(TrashEntry::byte_size).sum();
        let mut manager =
            Self { max_items, max_bytes, next_id: max_seen + 1, entries, total_bytes };
        manager.trim();
        manager
    }

    pub fn entries(&self) -> &[TrashEntry] {
        &self.entries
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    fn allocate_id(&mut self) -> String {
        let id = format!("trash_{}", self.next_id);
        self.next_id += 1;
        id
    }

    /// Hands out the next id before the entry exists; mount-delegated
    /// trashing needs the id for the adapter call first.
    pub fn reserve_id(&mut self) -> String {
        self.allocate_id()
    }

    /// Captures a memory-originated subtree. Returns the assigned id.
    pub fn add(&mut self, original_path: &str, node: SnapshotNode) -> String {
        let trash_id = self.allocate_id();
        let entry = TrashEntry {
            trash_id: trash_id.clone(),
            original_path: original_path.to_string(),
            node_type: node.node_type,
            deleted_at_ms: now_ms(),
            is_mounted: false,
            node: Some(node),
        };
        self.total_bytes += entry.byte_size();
        self.entries.insert(0, entry);
        self.trim();
        trash_id
    }

    /// Inserts an entry carrying a previously reserved or persisted id.
    /// Mount-delegated deletions and log replay both land here; the id
    /// counter stays ahead of the given id.
    pub fn insert_with_id(&mut self, entry: TrashEntry) {
        if let Some(n) =
            entry.trash_id.strip_prefix("trash_").and_then(|n| n.parse::<u64>().ok())
        {
            self.next_id = self.next_id.max(n + 1);
        }
        self.total_bytes += entry.byte_size();
        self.entries.insert(0, entry);
        self.trim();
    }

    pub fn contains(&self, trash_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.trash_id == trash_id)
    }

    /// Removes and returns the entry; restore path.
    pub fn take(&mut self, trash_id: &str) -> Result<TrashEntry> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.trash_id == trash_id)
            .ok_or_else(no_such_entry)?;
        let entry = self.entries.remove(index);
        self.total_bytes -= entry.byte_size();
        Ok(entry)
    }

    /// Newest-first listing.
    pub fn list(&self) -> Vec<TrashInfo> {
        self.entries
            .iter()
            .map(|entry| TrashInfo {
                trash_id: entry.trash_id.clone(),
                original_path: entry.original_path.clone(),
                node_type: entry.node_type,
                deleted_at_ms: entry.deleted_at_ms,
                is_mounted: entry.is_mounted,
                bytes: entry.byte_size(),
            })
            .collect()
    }

    pub fn purge(&mut self, trash_id: &str) -> Result<()> {
        self.take(trash_id).map(|_| ())
    }

    pub fn purge_all(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    fn trim(&mut self) {
        while self.entries.len() > self.max_items || self.total_bytes > self.max_bytes {
            match self.entries.pop() {
                Some(evicted) => {
                    self.total_bytes -= evicted.byte_size();
                    tracing::debug!(
                        "trash evicted {} ({})",
                        evicted.trash_id,
                        evicted.original_path
                    );
                }
                None => break,
            }
        }
    }
}

fn no_such_entry() -> VfsError {
    VfsError::new(ErrorKind::NotFound, "no such trash entry")
}
