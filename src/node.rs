//! Nodes of the in-memory tree.

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::block::BlockStorage;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Node type discriminant. The numeric values are the persisted tags.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize,
)]
pub enum NodeType {
    File = 0,
    Directory = 1,
    Symlink = 2,
}

/// Single-user rwx permission bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permissions {
    /// Readable and writable, not executable.
    pub fn default_file() -> Self {
        Self { read: true, write: true, execute: false }
    }

    /// Readable, writable and traversable.
    pub fn default_dir() -> Self {
        Self { read: true, write: true, execute: true }
    }

    pub fn read_only() -> Self {
        Self { read: true, write: false, execute: false }
    }

    /// Packs into the persisted 3-bit mask (r=4, w=2, x=1).
    pub fn bits(self) -> u8 {
        (self.read as u8) << 2 | (self.write as u8) << 1 | self.execute as u8
    }

    pub fn from_bits(bits: u8) -> Self {
        Self { read: bits & 4 != 0, write: bits & 2 != 0, execute: bits & 1 != 0 }
    }
}

/// Type-specific payload of a node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    File(BlockStorage),
    Directory(IndexMap<String, Node>),
    Symlink(String),
}

/// One entry in the virtual tree.
///
/// All access runs under the facade's coordinator lock in this version;
/// per-node locking, if it ever lands, attaches here.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub created_at: u64,
    pub modified_at: u64,
    pub permissions: Permissions,
    pub xattrs: IndexMap<String, Vec<u8>>,
    pub kind: NodeKind,
}

impl Node {
    pub fn new_file(name: impl Into<String>, block_size: usize) -> Self {
        let now = now_ms();
        Self {
            name: name.into(),
            created_at: now,
            modified_at: now,
            permissions: Permissions::default_file(),
            xattrs: IndexMap::new(),
            kind: NodeKind::File(BlockStorage::new(block_size)),
        }
    }

    pub fn new_dir(name: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            name: name.into(),
            created_at: now,
            modified_at: now,
            permissions: Permissions::default_dir(),
            xattrs: IndexMap::new(),
            kind: NodeKind::Directory(IndexMap::new()),
        }
    }

    pub fn new_symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            name: name.into(),
            created_at: now,
            modified_at: now,
            permissions: Permissions::default_file(),
            xattrs: IndexMap::new(),
            kind: NodeKind::Symlink(target.into()),
        }
    }

    pub fn node_type(&self) -> NodeType {
        match &self.kind {
            NodeKind::File(_) => NodeType::File,
            NodeKind::Directory(_) => NodeType::Directory,
            NodeKind::Symlink(_) => NodeType::Symlink,
        }
    }

    /// Logical size: byte count for files, zero otherwise.
    pub fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File(content) => content.len(),
            _ => 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File(_))
    }

    pub fn children(&self) -> Option<&IndexMap<String, Node>> {
        match &self.kind {
            NodeKind::Directory(children) => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut IndexMap<String, Node>> {
        match &mut self.kind {
            NodeKind::Directory(children) => Some(children),
            _ => None,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.modified_at = now_ms();
    }
}

/// Metadata snapshot returned by `stat`-family operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStat {
    pub path: String,
    pub node_type: NodeType,
    pub size: u64,
    pub created_at: u64,
    pub modified_at: u64,
    pub permissions: Permissions,
    /// Populated for symlinks observed via `lstat`.
    pub target: Option<String>,
}

/// Entry returned by `read_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub node_type: NodeType,
}
