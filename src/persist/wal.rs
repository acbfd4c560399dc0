//! Write-ahead-log records.

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::node::Permissions;

/// One logged mutation.
///
/// Entries are self-contained and idempotent under replay against a
/// consistent snapshot: each applies itself only when its structural
/// precondition holds and silently no-ops otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    CreateFile { path: String },
    CreateDir { path: String },
    CreateSymlink { path: String, target: String },
    Delete { path: String },
    Write { path: String, offset: u64, data: Vec<u8> },
    SetPermissions { path: String, permissions: Permissions },
    SetXattr { path: String, name: String, value: Vec<u8> },
    RemoveXattr { path: String, name: String },
    Copy { from: String, to: String },
    Move { from: String, to: String },
    MoveToTrash { path: String, trash_id: String },
    RestoreFromTrash { trash_id: String, path: String },
}

/// Persisted record tags. Fixed constants; never renumber.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub(crate) enum WalTag {
    CreateFile = 1,
    CreateDir = 2,
    CreateSymlink = 3,
    Delete = 4,
    Write = 5,
    SetPermissions = 6,
    SetXattr = 7,
    RemoveXattr = 8,
    Copy = 9,
    Move = 10,
    MoveToTrash = 11,
    RestoreFromTrash = 12,
}

impl WalEntry {
    pub(crate) fn tag(&self) -> WalTag {
        match self {
            WalEntry::CreateFile { .. } => WalTag::CreateFile,
            WalEntry::CreateDir { .. } => WalTag::CreateDir,
            WalEntry::CreateSymlink { .. } => WalTag::CreateSymlink,
            WalEntry::Delete { .. } => WalTag::Delete,
            WalEntry::Write { .. } => WalTag::Write,
            WalEntry::SetPermissions { .. } => WalTag::SetPermissions,
            WalEntry::SetXattr { .. } => WalTag::SetXattr,
            WalEntry::RemoveXattr { .. } => WalTag::RemoveXattr,
            WalEntry::Copy { .. } => WalTag::Copy,
            WalEntry::Move { .. } => WalTag::Move,
            WalEntry::MoveToTrash { .. } => WalTag::MoveToTrash,
            WalEntry::RestoreFromTrash { .. } => WalTag::RestoreFromTrash,
        }
    }
}
