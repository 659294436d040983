//! Ingestion counters.
//!
//! Monotonic totals since process start. Diagnostics only; nothing reads them to
//! make decisions.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IngestStats {
    pub chunks_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub acks_delivered: AtomicU64,
    pub acks_dropped: AtomicU64,
    pub connections_total: AtomicU64,
    pub abnormal_disconnects: AtomicU64,
    pub uploads_stored: AtomicU64,
    pub upload_bytes: AtomicU64,
    pub uploads_failed: AtomicU64,
    pub relays_opened: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`], ready to serialize.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub acks_delivered: u64,
    pub acks_dropped: u64,
    pub connections_total: u64,
    pub abnormal_disconnects: u64,
    pub uploads_stored: u64,
    pub upload_bytes: u64,
    pub uploads_failed: u64,
    pub relays_opened: u64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            acks_delivered: self.acks_delivered.load(Ordering::Relaxed),
            acks_dropped: self.acks_dropped.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            abnormal_disconnects: self.abnormal_disconnects.load(Ordering::Relaxed),
            uploads_stored: self.uploads_stored.load(Ordering::Relaxed),
            upload_bytes: self.upload_bytes.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            relays_opened: self.relays_opened.load(Ordering::Relaxed),
        }
    }
}

/// Add `n` to a counter.
pub(crate) fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}
