//! keepfs - an embeddable, crash-safe virtual filesystem.
//!
//! A POSIX-flavoured hierarchical namespace held in memory, persisted
//! through a CRC-framed write-ahead log with automatic snapshots, and
//! extended with pass-through mounts onto real directories, advisory
//! file locks, per-path version history, a bounded trash store,
//! extended attributes and change events.
//!
//! The library is embedded and driven from application code; nothing
//! is mounted into the host operating system. All state funnels
//! through [`vfs::VirtualFileSystem`], which persists into any
//! [`store::BlobStore`] and forwards mounted subtrees to any
//! [`adapter::DiskAdapter`].

pub mod adapter;
mod block;
mod cache;
mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod flock;
pub mod metrics;
pub mod mount;
pub mod node;
mod path;
pub mod persist;
pub mod store;
pub mod trash;
mod tree;
pub mod versions;
pub mod vfs;

pub use config::{CodecKind, VfsConfig};
pub use error::{ErrorKind, Result, VfsError};
pub use events::{EventKind, EventStream, FsEvent};
pub use flock::LockType;
pub use persist::LoadResult;
pub use vfs::{FileHandle, OpenMode, VirtualFileSystem};
