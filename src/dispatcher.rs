//! Bounded Decode Dispatcher
//!
//! Fans raw frames out to a bounded set of tokio tasks. Submission never
//! blocks: when every slot is taken the frame is dropped and counted. Each task
//! runs under `catch_unwind`, so a panicking frame only costs that frame.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, error, info, warn};

use crate::decoder::DecodeError;
use crate::entry::EntryDecoder;
use crate::filter::{match_addresses, WatchList};
use crate::publisher::{MatchEvent, MatchReporter};
use crate::stats::{percentage, should_warn_failures, Stats};

/// Default number of concurrently running decode tasks
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Maximum number of frames decoding at once
    pub capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Errors returned by [`Dispatcher::submit`]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Worker pool saturated ({0} tasks in flight), frame dropped")]
    Saturated(usize),

    #[error("Dispatcher is closed")]
    Closed,
}

/// One frame from the feed, owned by the task that decodes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub slot: u64,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn new(slot: u64, payload: Vec<u8>) -> Self {
        Self { slot, payload }
    }

    /// Copy a payload out of a buffer the transport may reuse
    pub fn copy_from(slot: u64, payload: &[u8]) -> Self {
        Self {
            slot,
            payload: payload.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// What a processor did with a frame it decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameOutcome {
    pub transactions: usize,
    pub matched: usize,
    pub partial: bool,
}

/// Work performed on each frame
#[async_trait]
pub trait FrameProcessor: Send + Sync + 'static {
    async fn process(&self, frame: RawFrame) -> Result<FrameOutcome, DecodeError>;

    /// Called once each time a feed subscription is established
    fn on_subscribed(&self) {}
}

/// Decodes entries, matches against the watch list and reports matches
pub struct EntryProcessor {
    decoder: EntryDecoder,
    watchlist: Arc<WatchList>,
    reporter: Arc<dyn MatchReporter>,
    stats: Arc<Stats>,
}

impl EntryProcessor {
    pub fn new(
        decoder: EntryDecoder,
        watchlist: Arc<WatchList>,
        reporter: Arc<dyn MatchReporter>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            decoder,
            watchlist,
            reporter,
            stats,
        }
    }
}

#[async_trait]
impl FrameProcessor for EntryProcessor {
    fn on_subscribed(&self) {
        info!("Watching {} addresses:", self.watchlist.len());
        for (address, label) in self.watchlist.iter() {
            info!("  {} ({})", address, label);
        }
    }

    async fn process(&self, frame: RawFrame) -> Result<FrameOutcome, DecodeError> {
        let decoded = self.decoder.decode(&frame.payload)?;
        let partial = decoded.is_partial();
        if partial {
            self.stats.record_partial();
            warn!(
                slot = frame.slot,
                "Entry declared {} transactions, decoded {}",
                decoded.declared_txns,
                decoded.entry.transactions.len()
            );
        }

        let transactions = &decoded.entry.transactions;
        let mut events = Vec::new();
        for (index, tx) in transactions.iter().enumerate() {
            let matches = match_addresses(&tx.message, &self.watchlist);
            if matches.is_empty() {
                continue;
            }
            self.stats.record_match();
            events.push(MatchEvent::new(
                frame.slot,
                index,
                transactions.len(),
                tx,
                &matches,
            ));
        }

        for event in &events {
            if let Err(e) = self.reporter.report(event).await {
                let unreported = self.stats.record_report_error();
                warn!(unreported, "Failed to report match {}: {}", event.signature, e);
            }
        }

        Ok(FrameOutcome {
            transactions: transactions.len(),
            matched: events.len(),
            partial,
        })
    }
}

/// Bounded, non-blocking worker pool
pub struct Dispatcher<P: FrameProcessor> {
    processor: Arc<P>,
    stats: Arc<Stats>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl<P: FrameProcessor> Dispatcher<P> {
    pub fn new(processor: Arc<P>, stats: Arc<Stats>, capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            processor,
            stats,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn with_config(processor: Arc<P>, stats: Arc<Stats>, config: DispatcherConfig) -> Self {
        Self::new(processor, stats, config.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Hand a frame to a worker without waiting.
    ///
    /// Must be called from within a tokio runtime. Every call counts one frame,
    /// including frames dropped for saturation.
    pub fn submit(&self, frame: RawFrame) -> Result<(), SubmitError> {
        self.stats.record_frame();

        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                self.stats.record_dropped();
                debug!(slot = frame.slot, "Worker pool saturated, dropping frame");
                return Err(SubmitError::Saturated(self.capacity));
            }
            Err(TryAcquireError::Closed) => {
                self.stats.record_dropped();
                return Err(SubmitError::Closed);
            }
        };

        let processor = Arc::clone(&self.processor);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let slot = frame.slot;
            let result = AssertUnwindSafe(processor.process(frame))
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(outcome)) => {
                    stats.record_decoded(outcome.transactions as u64);
                }
                Ok(Err(e)) => {
                    let failed = stats.record_decode_failure();
                    debug!(slot, "Failed to decode entry: {}", e);
                    warn_on_failure_rate(&stats, failed);
                }
                Err(panic) => {
                    let failed = stats.record_worker_fault();
                    error!(slot, "Worker panicked: {}", panic_message(&panic));
                    warn_on_failure_rate(&stats, failed);
                }
            }
            drop(permit);
        });

        Ok(())
    }

    /// Wait until every in-flight task has finished
    pub async fn drain(&self) {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        if let Ok(permits) = self.permits.acquire_many(all).await {
            drop(permits);
        }
    }

    /// Refuse new work. In-flight tasks keep running to completion.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Drain in-flight work, then close
    pub async fn shutdown(self) {
        self.drain().await;
        self.close();
    }
}

impl<P: FrameProcessor> Drop for Dispatcher<P> {
    fn drop(&mut self) {
        // in-flight tasks are abandoned, not cancelled
        self.permits.close();
    }
}

/// Emit the failure-rate warning when due; returns whether it fired
fn warn_on_failure_rate(stats: &Stats, failed: u64) -> bool {
    let total = stats.total_frames();
    let due = should_warn_failures(failed, total);
    if due {
        warn!(
            "{} entries failed to decode ({:.2}% failure rate)",
            failed,
            percentage(failed, total)
        );
    }
    due
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
