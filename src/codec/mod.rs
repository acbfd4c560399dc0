//! Encoding of everything that reaches the blob store.
//!
//! Every persisted blob is framed with a CRC32 over its payload.
//! Single-object blobs (snapshot, mounts, versions, trash) are
//! `[BE32 CRC][payload]`; the write-ahead log is a concatenation of
//! `[BE32 CRC][BE32 length][payload]` records so it can be decoded
//! incrementally and survive a corrupt tail.
//!
//! Two interchangeable payload encodings exist: compact TLV (the
//! default) and self-describing CBOR. The configured codec is
//! authoritative for decoding; nothing is sniffed.

mod cbor;
pub mod primitive;
mod tlv;

use byteorder::{BigEndian, ByteOrder};

use crate::config::CodecKind;
use crate::error::VfsError;
use crate::mount::PersistedMount;
use crate::persist::snapshot::SnapshotNode;
use crate::persist::wal::WalEntry;
use crate::trash::TrashEntry;
use crate::versions::VersionTable;

/// Result of encoding and decoding operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Codec failures. All of them surface to callers as `CorruptedData`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o: {0}")]
    Io(std::io::Error),
    #[error("crc mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    CrcMismatch { stored: u32, computed: u32 },
    #[error("blob too short for its frame")]
    Truncated,
    #[error("varint exceeds 64 bits")]
    VarIntOverflow,
    #[error("length {0} out of bounds")]
    LengthOutOfBounds(u64),
    #[error("invalid boolean byte {0}")]
    InvalidBool(u8),
    #[error("invalid utf-8 string")]
    InvalidUtf8,
    #[error("unknown tag {0}")]
    UnknownTag(u8),
    #[error("cbor: {0}")]
    Cbor(String),
}

impl From<Error> for VfsError {
    fn from(err: Error) -> Self {
        VfsError::corrupted(err.to_string())
    }
}

const FRAME_HEADER: usize = 4;
const RECORD_HEADER: usize = 8;

fn crc32(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

/// Frames a single-object payload: `[BE32 CRC][payload]`.
pub fn frame_blob(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER + payload.len());
    out.extend_from_slice(&crc32(payload).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Verifies and strips a single-object frame.
pub fn unframe_blob(blob: &[u8]) -> Result<&[u8]> {
    if blob.len() < FRAME_HEADER {
        return Err(Error::Truncated);
    }
    let stored = BigEndian::read_u32(&blob[..FRAME_HEADER]);
    let payload = &blob[FRAME_HEADER..];
    let computed = crc32(payload);
    if stored != computed {
        return Err(Error::CrcMismatch { stored, computed });
    }
    Ok(payload)
}

/// Frames one WAL record: `[BE32 CRC][BE32 length][payload]`.
pub fn frame_record(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_HEADER + payload.len());
    out.extend_from_slice(&crc32(payload).to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decoded write-ahead log.
#[derive(Debug, Default)]
pub struct WalDecode {
    pub entries: Vec<WalEntry>,
    /// Records whose payload failed to decode; skipped, not fatal.
    pub skipped: usize,
    /// Whether a corrupt or truncated tail cut iteration short.
    pub truncated: bool,
}

/// Payload encoder/decoder selected by configuration.
#[derive(Debug, Copy, Clone)]
pub struct PersistenceCodec {
    kind: CodecKind,
}

impl PersistenceCodec {
    pub fn new(kind: CodecKind) -> Self {
        Self { kind }
    }

    pub fn encode_snapshot(&self, root: &SnapshotNode) -> Vec<u8> {
        let payload = match self.kind {
            CodecKind::Tlv => tlv::encode_snapshot(root),
            CodecKind::Cbor => cbor::encode(root),
        };
        frame_blob(&payload)
    }

    pub fn decode_snapshot(&self, blob: &[u8]) -> Result<SnapshotNode> {
        let payload = unframe_blob(blob)?;
        match self.kind {
            CodecKind::Tlv => tlv::decode_snapshot(payload),
            CodecKind::Cbor => cbor::decode(payload),
        }
    }

    pub fn encode_mounts(&self, mounts: &[PersistedMount]) -> Vec<u8> {
        let payload = match self.kind {
            CodecKind::Tlv => tlv::encode_mounts(mounts),
            CodecKind::Cbor => cbor::encode(mounts),
        };
        frame_blob(&payload)
    }

    pub fn decode_mounts(&self, blob: &[u8]) -> Result<Vec<PersistedMount>> {
        let payload = unframe_blob(blob)?;
        match self.kind {
            CodecKind::Tlv => tlv::decode_mounts(payload),
            CodecKind::Cbor => cbor::decode(payload),
        }
    }

    pub fn encode_versions(&self, versions: &VersionTable) -> Vec<u8> {
        let payload = match self.kind {
            CodecKind::Tlv => tlv::encode_versions(versions),
            CodecKind::Cbor => cbor::encode(versions),
        };
        frame_blob(&payload)
    }

    pub fn decode_versions(&self, blob: &[u8]) -> Result<VersionTable> {
        let payload = unframe_blob(blob)?;
        match self.kind {
            CodecKind::Tlv => tlv::decode_versions(payload),
            CodecKind::Cbor => cbor::decode(payload),
        }
    }

    pub fn encode_trash(&self, entries: &[TrashEntry]) -> Vec<u8> {
        let payload = match self.kind {
            CodecKind::Tlv => tlv::encode_trash(entries),
            CodecKind::Cbor => cbor::encode(entries),
        };
        frame_blob(&payload)
    }

    pub fn decode_trash(&self, blob: &[u8]) -> Result<Vec<TrashEntry>> {
        let payload = unframe_blob(blob)?;
        match self.kind {
            CodecKind::Tlv => tlv::decode_trash(payload),
            CodecKind::Cbor => cbor::decode(payload),
        }
    }

    pub fn encode_wal_record(&self, entry: &WalEntry) -> Vec<u8> {
        let payload = match self.kind {
            CodecKind::Tlv => tlv::encode_wal_entry(entry),
            CodecKind::Cbor => cbor::encode(entry),
        };
        frame_record(&payload)
    }

    /// Walks a concatenated record log.
    ///
    /// A bad CRC or truncated frame ends iteration, keeping everything
    /// before it. A record whose payload fails to decode is skipped.
    pub fn decode_wal(&self, blob: &[u8]) -> WalDecode {
        let mut out = WalDecode::default();
        let mut pos = 0;
        while pos < blob.len() {
            if pos + RECORD_HEADER > blob.len() {
                out.truncated = true;
                break;
            }
            let stored = BigEndian::read_u32(&blob[pos..pos + 4]);
            let length = BigEndian::read_u32(&blob[pos + 4..pos + 8]) as usize;
            let payload_end = pos + RECORD_HEADER + length;
            if payload_end > blob.len() {
                out.truncated = true;
                break;
            }
            let payload = &blob[pos + RECORD_HEADER..payload_end];
            if crc32(payload) != stored {
                out.truncated = true;
                break;
            }
            let decoded = match self.kind {
                CodecKind::Tlv => tlv::decode_wal_entry(payload),
                CodecKind::Cbor => cbor::decode(payload),
            };
            match decoded {
                Ok(entry) => out.entries.push(entry),
                Err(err) => {
                    tracing::warn!("skipping undecodable log record: {err}");
                    out.skipped += 1;
                }
            }
            pos = payload_end;
        }
        out
    }
}
