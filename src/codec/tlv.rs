//! Compact TLV payload encoding.
//!
//! Layouts are deterministic: fields in declaration order, collections
//! with a VarInt count prefix, variants tagged with one byte.

use std::io::Read;

use num_traits::FromPrimitive;

use super::primitive::{
    read_bool, read_bytes, read_string, read_u64, read_u8, read_varint, write_bool, write_bytes,
    write_string, write_u64, write_u8, write_varint,
};
use super::{Error, Result, VersionTable};
use crate::mount::PersistedMount;
use crate::node::{NodeType, Permissions};
use crate::persist::snapshot::SnapshotNode;
use crate::persist::wal::{WalEntry, WalTag};
use crate::trash::TrashEntry;
use crate::versions::VersionRecord;

fn write_node_type(dest: &mut Vec<u8>, node_type: NodeType) {
    write_u8(dest, node_type as u8);
}

fn read_node_type(src: &mut impl Read) -> Result<NodeType> {
    let tag = read_u8(src)?;
    NodeType::from_u8(tag).ok_or(Error::UnknownTag(tag))
}

fn write_permissions(dest: &mut Vec<u8>, permissions: Permissions) {
    write_u8(dest, permissions.bits());
}

fn read_permissions(src: &mut impl Read) -> Result<Permissions> {
    Ok(Permissions::from_bits(read_u8(src)?))
}

fn write_node(dest: &mut Vec<u8>, node: &SnapshotNode) {
    write_string(dest, &node.name);
    write_node_type(dest, node.node_type);
    write_u64(dest, node.created_at);
    write_u64(dest, node.modified_at);
    write_permissions(dest, node.permissions);
    match node.node_type {
        NodeType::File => write_bytes(dest, node.content.as_deref().unwrap_or_default()),
        NodeType::Symlink => write_string(dest, node.target.as_deref().unwrap_or_default()),
        NodeType::Directory => {
            write_varint(dest, node.children.len() as u64);
            for child in &node.children {
                write_node(dest, child);
            }
        }
    }
    write_varint(dest, node.xattrs.len() as u64);
    for (name, value) in &node.xattrs {
        write_string(dest, name);
        write_bytes(dest, value);
    }
}

fn read_node(src: &mut impl Read) -> Result<SnapshotNode> {
    let name = read_string(src)?;
    let node_type = read_node_type(src)?;
    let created_at = read_u64(src)?;
    let modified_at = read_u64(src)?;
    let permissions = read_permissions(src)?;

    let mut content = None;
    let mut target = None;
    let mut children = Vec::new();
    match node_type {
        NodeType::File => content = Some(read_bytes(src)?),
        NodeType::Symlink => target = Some(read_string(src)?),
        NodeType::Directory => {
            let count = read_varint(src)?;
            children = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                children.push(read_node(src)?);
            }
        }
    }

    let xattr_count = read_varint(src)?;
    let mut xattrs = indexmap::IndexMap::new();
    for _ in 0..xattr_count {
        let name = read_string(src)?;
        let value = read_bytes(src)?;
        xattrs.insert(name, value);
    }

    Ok(SnapshotNode {
        name,
        node_type,
        created_at,
        modified_at,
        permissions,
        content,
        target,
        children,
        xattrs,
    })
}

pub fn encode_snapshot(root: &SnapshotNode) -> Vec<u8> {
    let mut out = Vec::new();
    write_node(&mut out, root);
    out
}

pub fn decode_snapshot(payload: &[u8]) -> Result<SnapshotNode> {
    read_node(&mut std::io::Cursor::new(payload))
}

pub fn encode_wal_entry(entry: &WalEntry) -> Vec<u8> {
    let mut out = Vec::new();
    write_u8(&mut out, entry.tag() as u8);
    match entry {
        WalEntry::CreateFile { path } | WalEntry::CreateDir { path } => {
            write_string(&mut out, path);
        }
        WalEntry::CreateSymlink { path, target } => {
            write_string(&mut out, path);
            write_string(&mut out, target);
        }
        WalEntry::Delete { path } => write_string(&mut out, path),
        WalEntry::Write { path, offset, data } => {
            write_string(&mut out, path);
            write_u64(&mut out, *offset);
            write_bytes(&mut out, data);
        }
        WalEntry::SetPermissions { path, permissions } => {
            write_string(&mut out, path);
            write_permissions(&mut out, *permissions);
        }
        WalEntry::SetXattr { path, name, value } => {
            write_string(&mut out, path);
            write_string(&mut out, name);
            write_bytes(&mut out, value);
        }
        WalEntry::RemoveXattr { path, name } => {
            write_string(&mut out, path);
            write_string(&mut out, name);
        }
        WalEntry::Copy { from, to } | WalEntry::Move { from, to } => {
            write_string(&mut out, from);
            write_string(&mut out, to);
        }
        WalEntry::MoveToTrash { path, trash_id } => {
            write_string(&mut out, path);
            write_string(&mut out, trash_id);
        }
        WalEntry::RestoreFromTrash { trash_id, path } => {
            write_string(&mut out, trash_id);
            write_string(&mut out, path);
        }
    }
    out
}

pub fn decode_wal_entry(payload: &[u8]) -> Result<WalEntry> {
    let src = &mut std::io::Cursor::new(payload);
    let tag = read_u8(src)?;
    let tag = WalTag::from_u8(tag).ok_or(Error::UnknownTag(tag))?;
    let entry = match tag {
        WalTag::CreateFile => WalEntry::CreateFile { path: read_string(src)? },
        WalTag::CreateDir => WalEntry::CreateDir { path: read_string(src)? },
        WalTag::CreateSymlink => {
            WalEntry::CreateSymlink { path: read_string(src)?, target: read_string(src)? }
        }
        WalTag::Delete => WalEntry::Delete { path: read_string(src)? },
        WalTag::Write => WalEntry::Write {
            path: read_string(src)?,
            offset: read_u64(src)?,
            data: read_bytes(src)?,
        },
        WalTag::SetPermissions => WalEntry::SetPermissions {
            path: read_string(src)?,
            permissions: read_permissions(src)?,
        },
        WalTag::SetXattr => WalEntry::SetXattr {
            path: read_string(src)?,
            name: read_string(src)?,
            value: read_bytes(src)?,
        },
        WalTag::RemoveXattr => {
            WalEntry::RemoveXattr { path: read_string(src)?, name: read_string(src)? }
        }
        WalTag::Copy => WalEntry::Copy { from: read_string(src)?, to: read_string(src)? },
        WalTag::Move => WalEntry::Move { from: read_string(src)?, to: read_string(src)? },
        WalTag::MoveToTrash => {
            WalEntry::MoveToTrash { path: read_string(src)?, trash_id: read_string(src)? }
        }
        WalTag::RestoreFromTrash => {
            WalEntry::RestoreFromTrash { trash_id: read_string(src)?, path: read_string(src)? }
        }
    };
    Ok(entry)
}

pub fn encode_mounts(mounts: &[PersistedMount]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, mounts.len() as u64);
    for mount in mounts {
        write_string(&mut out, &mount.virtual_path);
        write_string(&mut out, &mount.root_path);
        write_bool(&mut out, mount.read_only);
    }
    out
}

pub fn decode_mounts(payload: &[u8]) -> Result<Vec<PersistedMount>> {
    let src = &mut std::io::Cursor::new(payload);
    let count = read_varint(src)?;
    let mut mounts = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        mounts.push(PersistedMount {
            virtual_path: read_string(src)?,
            root_path: read_string(src)?,
            read_only: read_bool(src)?,
        });
    }
    Ok(mounts)
}

pub fn encode_versions(versions: &VersionTable) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, versions.len() as u64);
    for (path, records) in versions {
        write_string(&mut out, path);
        write_varint(&mut out, records.len() as u64);
        for record in records {
            write_string(&mut out, &record.version_id);
            write_u64(&mut out, record.timestamp_ms);
            write_bytes(&mut out, &record.data);
        }
    }
    out
}

pub fn decode_versions(payload: &[u8]) -> Result<VersionTable> {
    let src = &mut std::io::Cursor::new(payload);
    let path_count = read_varint(src)?;
    let mut table = VersionTable::new();
    for _ in 0..path_count {
        let path = read_string(src)?;
        let record_count = read_varint(src)?;
        let mut records = Vec::with_capacity(record_count.min(1024) as usize);
        for _ in 0..record_count {
            records.push(VersionRecord {
                version_id: read_string(src)?,
                timestamp_ms: read_u64(src)?,
                data: read_bytes(src)?,
            });
        }
        table.insert(path, records);
    }
    Ok(table)
}

pub fn encode_trash(entries: &[TrashEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, entries.len() as u64);
    for entry in entries {
        write_string(&mut out, &entry.trash_id);
        write_string(&mut out, &entry.original_path);
        write_node_type(&mut out, entry.node_type);
        write_u64(&mut out, entry.deleted_at_ms);
        write_bool(&mut out, entry.is_mounted);
        match &entry.node {
            Some(node) => {
                write_bool(&mut out, true);
                write_node(&mut out, node);
            }
            None => write_bool(&mut out, false),
        }
    }
    out
}

pub fn decode_trash(payload: &[u8]) -> Result<Vec<TrashEntry>> {
    let src = &mut std::io::Cursor::new(payload);
    let count = read_varint(src)?;
    let mut entries = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let trash_id = read_string(src)?;
        let original_path = read_string(src)?;
        let node_type = read_node_type(src)?;
        let deleted_at_ms = read_u64(src)?;
        let is_mounted = read_bool(src)?;
        let node = if read_bool(src)? { Some(read_node(src)?) } else { None };
        entries.push(TrashEntry {
            trash_id,
            original_path,
            node_type,
            deleted_at_ms,
            is_mounted,
            node,
        });
    }
    Ok(entries)
}
