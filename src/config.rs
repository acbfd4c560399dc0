//! Library configuration.

use serde::Deserialize;

use crate::error::{Result, VfsError};

/// Payload encoding used for persisted blobs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Compact tag-length-value encoding. The default.
    #[default]
    Tlv,
    /// Self-describing CBOR, for interoperability and debugging.
    Cbor,
}

/// Blob-store keys used by the persistence layer.
///
/// Each key also has a transient `<key>.tmp` companion used by the
/// atomic-write protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageKeys {
    pub snapshot: String,
    pub wal: String,
    pub mounts: String,
    pub versions: String,
    pub trash: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            snapshot: "snapshot".into(),
            wal: "wal".into(),
            mounts: "mounts".into(),
            versions: "versions".into(),
            trash: "trash".into(),
        }
    }
}

impl StorageKeys {
    /// Companion key written by the atomic-write protocol.
    pub fn tmp(key: &str) -> String {
        format!("{key}.tmp")
    }
}

/// Tunables for a [`crate::vfs::VirtualFileSystem`] instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Size of a content block. Files grow block by block; unallocated
    /// blocks read as zeroes.
    pub block_size: usize,
    /// Encoding used for persisted blobs.
    pub codec: CodecKind,
    /// A snapshot is taken after this many logged operations.
    pub auto_snapshot_every: u32,
    /// Total bytes allowed in the in-memory tree, `-1` for unlimited.
    pub quota_bytes: i64,
    /// Per-path cap on retained versions.
    pub max_versions: usize,
    /// Trash store entry cap.
    pub trash_max_items: usize,
    /// Trash store byte cap.
    pub trash_max_bytes: u64,
    pub stat_cache_capacity: usize,
    pub readdir_cache_capacity: usize,
    /// Per-subscription event buffer; overflowing events are dropped.
    pub event_buffer_capacity: usize,
    /// Symlink chains longer than this resolve to `NotFound`.
    pub max_symlink_depth: usize,
    pub keys: StorageKeys,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            codec: CodecKind::Tlv,
            auto_snapshot_every: 20,
            quota_bytes: -1,
            max_versions: 10,
            trash_max_items: 100,
            trash_max_bytes: 50 * 1024 * 1024,
            stat_cache_capacity: 256,
            readdir_cache_capacity: 128,
            event_buffer_capacity: 256,
            max_symlink_depth: 40,
            keys: StorageKeys::default(),
        }
    }
}

impl VfsConfig {
    /// Parses a configuration from TOML, filling omitted fields with
    /// their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| VfsError::backend(format!("bad config: {err}")))
    }
}
