//! Metrics sink.
//!
//! The service reports through an injected [`SyncMetrics`] instead of
//! process-wide registries, so each instance (and each test) sees only its
//! own numbers.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Receiver of sync metrics.
pub trait SyncMetrics: Send + Sync {
    /// Blobs currently wanted went up (positive) or down (negative).
    fn wanted_blobs_changed(&self, delta: i64);

    /// A single peer sync wanted `n` blobs.
    fn wanted_blobs_total(&self, n: u64);

    /// A peer sync started.
    fn sync_started(&self);

    /// A peer sync finished.
    fn sync_finished(&self, ok: bool);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl SyncMetrics for NoopMetrics {
    fn wanted_blobs_changed(&self, _delta: i64) {}
    fn wanted_blobs_total(&self, _n: u64) {}
    fn sync_started(&self) {}
    fn sync_finished(&self, _ok: bool) {}
}

/// In-memory counters.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    wanted_blobs: AtomicI64,
    wanted_blobs_total: AtomicU64,
    syncs_total: AtomicU64,
    syncs_in_flight: AtomicI64,
    sync_errors_total: AtomicU64,
}

/// Point-in-time copy of a [`CounterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Blobs wanted right now.
    pub wanted_blobs: i64,
    /// Blobs ever wanted, counted once per peer sync.
    pub wanted_blobs_total: u64,
    /// Finished peer syncs.
    pub syncs_total: u64,
    /// Running peer syncs.
    pub syncs_in_flight: i64,
    /// Finished peer syncs that failed.
    pub sync_errors_total: u64,
}

impl CounterMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            wanted_blobs: self.wanted_blobs.load(Ordering::Relaxed),
            wanted_blobs_total: self.wanted_blobs_total.load(Ordering::Relaxed),
            syncs_total: self.syncs_total.load(Ordering::Relaxed),
            syncs_in_flight: self.syncs_in_flight.load(Ordering::Relaxed),
            sync_errors_total: self.sync_errors_total.load(Ordering::Relaxed),
        }
    }
}

impl SyncMetrics for CounterMetrics {
    fn wanted_blobs_changed(&self, delta: i64) {
        self.wanted_blobs.fetch_add(delta, Ordering::Relaxed);
    }

    fn wanted_blobs_total(&self, n: u64) {
        self.wanted_blobs_total.fetch_add(n, Ordering::Relaxed);
    }

    fn sync_started(&self) {
        self.syncs_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn sync_finished(&self, ok: bool) {
        self.syncs_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.syncs_total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.sync_errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }
}
