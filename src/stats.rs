//! Pipeline Statistics
//!
//! Lock-free counters shared by every pipeline stage, plus a periodic reporter
//! that logs derived rates. Producers only ever touch atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Default interval between stats reports
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Failure ratio above which every failure is warned about
pub const FAILURE_WARN_RATIO: f64 = 0.1;

/// Warn on every Nth failure regardless of ratio
pub const FAILURE_WARN_EVERY: u64 = 100;

/// Counters for one process
#[derive(Debug, Default)]
pub struct Stats {
    total_frames: AtomicU64,
    decoded_frames: AtomicU64,
    failed_frames: AtomicU64,
    dropped_frames: AtomicU64,
    partial_frames: AtomicU64,
    total_txs: AtomicU64,
    matched_txs: AtomicU64,
    decode_errors: AtomicU64,
    worker_faults: AtomicU64,
    report_errors: AtomicU64,
    reconnects: AtomicU64,
    last_slot: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_frame(&self) -> u64 {
        self.total_frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_decoded(&self, txs: u64) {
        self.decoded_frames.fetch_add(1, Ordering::Relaxed);
        self.total_txs.fetch_add(txs, Ordering::Relaxed);
    }

    /// Count a frame that failed to decode; returns the new failure count
    pub fn record_decode_failure(&self) -> u64 {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        self.failed_frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a panic caught inside a worker; returns the new failure count
    pub fn record_worker_fault(&self) -> u64 {
        self.worker_faults.fetch_add(1, Ordering::Relaxed);
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        self.failed_frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a frame dropped because the worker pool was saturated
    pub fn record_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partial(&self) {
        self.partial_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.matched_txs.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a match event the reporter failed to deliver
    pub fn record_report_error(&self) -> u64 {
        self.report_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_reconnect(&self) -> u64 {
        self.reconnects.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Raise the slot high-water mark; returns the previous mark
    pub fn observe_slot(&self, slot: u64) -> u64 {
        self.last_slot.fetch_max(slot, Ordering::Relaxed)
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Relaxed)
    }

    pub fn failed_frames(&self) -> u64 {
        self.failed_frames.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn last_slot(&self) -> u64 {
        self.last_slot.load(Ordering::Relaxed)
    }

    /// Read every counter. Values are individually consistent, not a global cut.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            decoded_frames: self.decoded_frames.load(Ordering::Relaxed),
            failed_frames: self.failed_frames.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            partial_frames: self.partial_frames.load(Ordering::Relaxed),
            total_txs: self.total_txs.load(Ordering::Relaxed),
            matched_txs: self.matched_txs.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            worker_faults: self.worker_faults.load(Ordering::Relaxed),
            report_errors: self.report_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            last_slot: self.last_slot.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_frames: u64,
    pub decoded_frames: u64,
    pub failed_frames: u64,
    pub dropped_frames: u64,
    pub partial_frames: u64,
    pub total_txs: u64,
    pub matched_txs: u64,
    pub decode_errors: u64,
    pub worker_faults: u64,
    pub report_errors: u64,
    pub reconnects: u64,
    pub last_slot: u64,
}

impl StatsSnapshot {
    /// Decoded frames as a percentage of all frames
    pub fn success_rate(&self) -> f64 {
        percentage(self.decoded_frames, self.total_frames)
    }

    /// Matched transactions as a percentage of all decoded transactions
    pub fn match_rate(&self) -> f64 {
        percentage(self.matched_txs, self.total_txs)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// `part / whole * 100`, or 0 when `whole` is 0
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Whether a failure count warrants a warning
pub fn should_warn_failures(failed: u64, total: u64) -> bool {
    if failed == 0 {
        return false;
    }
    failed % FAILURE_WARN_EVERY == 0
        || (total > 0 && failed as f64 / total as f64 > FAILURE_WARN_RATIO)
}

/// Log one stats report
pub fn log_snapshot(snapshot: &StatsSnapshot) {
    info!(
        slot = snapshot.last_slot,
        total_frames = snapshot.total_frames,
        decoded = snapshot.decoded_frames,
        failed = snapshot.failed_frames,
        dropped = snapshot.dropped_frames,
        "Entries: {} total, {} decoded ({:.2}%), {} failed",
        snapshot.total_frames,
        snapshot.decoded_frames,
        snapshot.success_rate(),
        snapshot.failed_frames
    );
    info!(
        total_txs = snapshot.total_txs,
        matched_txs = snapshot.matched_txs,
        decode_errors = snapshot.decode_errors,
        report_errors = snapshot.report_errors,
        reconnects = snapshot.reconnects,
        "Transactions: {} total, {} matched ({:.4}%), {} errors, {} unreported, {} reconnects",
        snapshot.total_txs,
        snapshot.matched_txs,
        snapshot.match_rate(),
        snapshot.decode_errors,
        snapshot.report_errors,
        snapshot.reconnects
    );
}

/// Spawn the periodic reporter.
///
/// Reports are skipped until the first frame arrives. The task ends when
/// `cancel` fires.
pub fn spawn_reporter(
    stats: Arc<Stats>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = stats.snapshot();
                    if snapshot.total_frames > 0 {
                        log_snapshot(&snapshot);
                    }
                }
            }
        }
    })
}
