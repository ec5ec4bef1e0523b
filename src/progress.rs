//! Progress reporting
//!
//! Callers observe a transfer through a progress callback invoked at
//! chunk-completion granularity. Reported byte counts are monotonically
//! non-decreasing within a session even when chunks finish out of order.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A progress snapshot delivered to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Completion percentage (0.0 - 100.0)
    pub percentage: f64,
    /// Bytes transferred so far
    pub bytes_done: u64,
    /// Total bytes (None when the server did not report a size)
    pub bytes_total: Option<u64>,
    /// Average transfer speed in bytes/sec
    pub speed: u64,
    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,
}

impl TransferProgress {
    /// Build a snapshot, deriving percentage and ETA
    pub fn new(bytes_done: u64, bytes_total: Option<u64>, speed: u64) -> Self {
        let percentage = match bytes_total {
            Some(0) => 100.0,
            Some(total) => (bytes_done as f64 / total as f64) * 100.0,
            None => 0.0,
        };
        let eta_seconds = match (bytes_total, speed) {
            (Some(total), s) if s > 0 => Some(total.saturating_sub(bytes_done) / s),
            _ => None,
        };
        Self {
            percentage,
            bytes_done,
            bytes_total,
            speed,
            eta_seconds,
        }
    }
}

/// Tracks aggregate progress for one session
///
/// Concurrent chunk completions report through a shared tracker; the
/// high-water mark guarantees `bytes_done` never goes backwards.
#[derive(Debug)]
pub struct ProgressTracker {
    total: Option<u64>,
    high_water: AtomicU64,
    started: Instant,
}

impl ProgressTracker {
    /// Create a tracker for a transfer of `total` bytes
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total,
            high_water: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Record the current byte count and produce a snapshot
    pub fn record(&self, bytes_done: u64) -> TransferProgress {
        let prev = self.high_water.fetch_max(bytes_done, Ordering::Relaxed);
        let done = prev.max(bytes_done);

        let elapsed = self.started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            (done as f64 / elapsed) as u64
        } else {
            0
        };
        TransferProgress::new(done, self.total, speed)
    }

    /// Highest byte count recorded so far
    pub fn bytes_done(&self) -> u64 {
        self.high_water.load(Ordering::Relaxed)
    }
}
