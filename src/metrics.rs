//! Lock-free per-operation counters.
//!
//! Every counter is an independent atomic; a snapshot reads them one
//! by one and is therefore only near-consistent across counters. That
//! is intentional: metrics never contend with the data path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Operations tracked individually.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpKind {
    CreateFile,
    CreateDir,
    CreateSymlink,
    Delete,
    Read,
    Write,
    Stat,
    ReadDir,
    SetPermissions,
    Copy,
    Move,
    Xattr,
    Mount,
    Sync,
}

pub const OP_KINDS: [OpKind; 14] = [
    OpKind::CreateFile,
    OpKind::CreateDir,
    OpKind::CreateSymlink,
    OpKind::Delete,
    OpKind::Read,
    OpKind::Write,
    OpKind::Stat,
    OpKind::ReadDir,
    OpKind::SetPermissions,
    OpKind::Copy,
    OpKind::Move,
    OpKind::Xattr,
    OpKind::Mount,
    OpKind::Sync,
];

#[derive(Default)]
struct OpCounters {
    count: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    total_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
}

/// Mark handed out by [`MetricsCollector::begin`]; carries the
/// monotonic start time back into [`MetricsCollector::end`].
#[derive(Debug)]
pub struct OpMark {
    op: OpKind,
    started: Instant,
}

/// Per-operation statistics in a [`MetricsSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpStats {
    pub count: u64,
    pub success: u64,
    pub failure: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
}

/// Point-in-time view of all counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ops: Vec<(OpKind, OpStats)>,
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
}

impl MetricsSnapshot {
    pub fn op(&self, op: OpKind) -> OpStats {
        self.ops
            .iter()
            .find(|(kind, _)| *kind == op)
            .map(|(_, stats)| *stats)
            .unwrap_or_default()
    }
}

/// Non-blocking metrics accumulator.
pub struct MetricsCollector {
    ops: [OpCounters; OP_KINDS.len()],
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            ops: std::array::from_fn(|_| OpCounters::default()),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub fn begin(&self, op: OpKind) -> OpMark {
        OpMark { op, started: Instant::now() }
    }

    pub fn end(&self, mark: OpMark, ok: bool) {
        let elapsed_ms = mark.started.elapsed().as_millis() as u64;
        let counters = &self.ops[mark.op as usize];
        counters.count.fetch_add(1, Ordering::Relaxed);
        if ok {
            counters.success.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failure.fetch_add(1, Ordering::Relaxed);
        }
        counters.total_latency_ms.fetch_add(elapsed_ms, Ordering::Relaxed);

        let mut current = counters.max_latency_ms.load(Ordering::Relaxed);
        while elapsed_ms > current {
            match counters.max_latency_ms.compare_exchange_weak(
                current,
                elapsed_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ops: OP_KINDS
                .iter()
                .map(|&op| {
                    let counters = &self.ops[op as usize];
                    (
                        op,
                        OpStats {
                            count: counters.count.load(Ordering::Relaxed),
                            success: counters.success.load(Ordering::Relaxed),
                            failure: counters.failure.load(Ordering::Relaxed),
                            total_latency_ms: counters.total_latency_ms.load(Ordering::Relaxed),
                            max_latency_ms: counters.max_latency_ms.load(Ordering::Relaxed),
                        },
                    )
                })
                .collect(),
            total_bytes_read: self.bytes_read.load(Ordering::Relaxed),
            total_bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}
