//! Per-instance operation counters.
//!
//! A store never registers its counters anywhere global. The caller builds an
//! `Arc<StoreMetrics>`, hands a clone to the store, and keeps the other to read
//! from. Two stores in one process therefore never share or clash on counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by a base store.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    pub gets: AtomicU64,
    pub puts: AtomicU64,
    pub deletes: AtomicU64,
    pub batches: AtomicU64,
    pub bytes_written: AtomicU64,
    pub wal_frames: AtomicU64,
    pub compactions: AtomicU64,
    pub iterators: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_iterator(&self) {
        self.iterators.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one applied batch and its individual operations.
    pub(crate) fn record_batch(&self, puts: u64, deletes: u64, bytes: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.puts.fetch_add(puts, Ordering::Relaxed);
        self.deletes.fetch_add(deletes, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_wal_frame(&self) {
        self.wal_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy for reporting.
    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            wal_frames: self.wal_frames.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            iterators: self.iterators.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`StoreMetrics`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetricsSnapshot {
    pub gets: u64,
    pub puts: u64,
    pub deletes: u64,
    pub batches: u64,
    pub bytes_written: u64,
    pub wal_frames: u64,
    pub compactions: u64,
    pub iterators: u64,
}
