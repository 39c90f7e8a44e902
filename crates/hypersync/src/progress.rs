//! Live progress of a discovery task.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;

/// Counters updated by a running discovery.
///
/// Shared between the worker that runs the task and anyone polling its
/// [`TaskInfo`](crate::TaskInfo), so every field is atomic.
#[derive(Debug, Default)]
pub struct Progress {
    /// Peers selected for syncing.
    pub peers_found: AtomicU32,
    /// Peers synced without error.
    pub peers_synced_ok: AtomicU32,
    /// Peers that failed.
    pub peers_failed: AtomicU32,
    /// Blobs we learned we are missing.
    pub blobs_discovered: AtomicU32,
    /// Blobs fetched.
    pub blobs_downloaded: AtomicU32,
    /// Blobs we wanted but did not get.
    pub blobs_failed: AtomicU32,
}

/// Point-in-time copy of a [`Progress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub peers_found: u32,
    pub peers_synced_ok: u32,
    pub peers_failed: u32,
    pub blobs_discovered: u32,
    pub blobs_downloaded: u32,
    pub blobs_failed: u32,
}

impl Progress {
    /// Read every counter.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            peers_found: self.peers_found.load(Ordering::Relaxed),
            peers_synced_ok: self.peers_synced_ok.load(Ordering::Relaxed),
            peers_failed: self.peers_failed.load(Ordering::Relaxed),
            blobs_discovered: self.blobs_discovered.load(Ordering::Relaxed),
            blobs_downloaded: self.blobs_downloaded.load(Ordering::Relaxed),
            blobs_failed: self.blobs_failed.load(Ordering::Relaxed),
        }
    }
}

/// Saturating add for counters fed from `usize` lengths.
pub(crate) fn bump(counter: &AtomicU32, n: usize) {
    counter.fetch_add(u32::try_from(n).unwrap_or(u32::MAX), Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let progress = Progress::default();
        bump(&progress.peers_found, 3);
        bump(&progress.blobs_downloaded, 7);
        progress.peers_failed.fetch_add(1, Ordering::Relaxed);

        let snap = progress.snapshot();
        assert_eq!(snap.peers_found, 3);
        assert_eq!(snap.blobs_downloaded, 7);
        assert_eq!(snap.peers_failed, 1);
        assert_eq!(snap.blobs_failed, 0);
    }
}
