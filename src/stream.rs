//! Stream Session Module
//!
//! Owns one feed subscription at a time: connect, subscribe, pull frames
//! sequentially and hand each to the dispatcher. A supervisor loop restarts the
//! session with a fixed delay whenever it ends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, DispatcherConfig, FrameProcessor, RawFrame, SubmitError};
use crate::stats::Stats;

/// Default shredstream proxy endpoint
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9999";

/// Connection establishment timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP/2 keep-alive ping interval
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a keep-alive ack
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest message accepted from the feed
pub const MAX_MESSAGE_SIZE: usize = 1000 * 1024 * 1024;

/// Fixed delay between sessions
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Slot jump above which a gap warning is logged
pub const DEFAULT_GAP_THRESHOLD: u64 = 10;

/// Errors from the feed transport. All of them end the current session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Max reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

/// Configuration for the feed connection and session loop
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub max_message_size: usize,
    pub reconnect_delay: Duration,
    /// Consecutive failed sessions tolerated before giving up; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    pub slot_gap_threshold: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout: CONNECT_TIMEOUT,
            keepalive_interval: KEEPALIVE_INTERVAL,
            keepalive_timeout: KEEPALIVE_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
            reconnect_delay: RECONNECT_DELAY,
            max_reconnect_attempts: None,
            slot_gap_threshold: DEFAULT_GAP_THRESHOLD,
        }
    }
}

impl StreamConfig {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

/// Check that an endpoint is a usable http(s) URI
pub fn validate_endpoint(endpoint: &str) -> Result<(), TransportError> {
    if endpoint.is_empty() {
        return Err(TransportError::InvalidEndpoint(
            "Endpoint cannot be empty".to_string(),
        ));
    }
    let rest = endpoint
        .strip_prefix("http://")
        .or_else(|| endpoint.strip_prefix("https://"))
        .ok_or_else(|| {
            TransportError::InvalidEndpoint(format!("{} must start with http:// or https://", endpoint))
        })?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(TransportError::InvalidEndpoint(format!(
            "{} has no host",
            endpoint
        )));
    }
    Ok(())
}

/// Opens subscriptions to the entry feed
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Connect and issue the subscription request
    async fn subscribe(&self) -> Result<Box<dyn FrameStream>, TransportError>;
}

/// An open subscription
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, `Ok(None)` on a clean end of stream
    async fn next_frame(&mut self) -> Result<Option<RawFrame>, TransportError>;
}

/// Lifecycle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Subscribed,
    Streaming,
    Closed,
    Failed,
}

/// Returns the gap size when `current` jumps more than `threshold` past the high-water mark
pub fn detect_gap(high_water: u64, current: u64, threshold: u64) -> Option<u64> {
    if high_water == 0 || current <= high_water {
        return None;
    }
    let gap = current - high_water;
    (gap > threshold).then_some(gap)
}

/// One connection lifecycle
pub struct StreamSession<P: FrameProcessor> {
    config: StreamConfig,
    processor: Arc<P>,
    dispatcher: Dispatcher<P>,
    stats: Arc<Stats>,
    state: SessionState,
    subscribed: bool,
    frames_received: u64,
}

impl<P: FrameProcessor> StreamSession<P> {
    pub fn new(
        config: StreamConfig,
        processor: Arc<P>,
        stats: Arc<Stats>,
        dispatcher: DispatcherConfig,
    ) -> Self {
        let dispatcher =
            Dispatcher::with_config(Arc::clone(&processor), Arc::clone(&stats), dispatcher);
        Self {
            config,
            processor,
            dispatcher,
            stats,
            state: SessionState::Connecting,
            subscribed: false,
            frames_received: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Whether the subscription was established at some point
    pub fn reached_subscription(&self) -> bool {
        self.subscribed
    }

    /// Run until the stream ends, fails or `cancel` fires.
    ///
    /// `Ok` means the session closed cleanly (end of stream or cancellation).
    pub async fn run(
        &mut self,
        connector: &dyn FeedConnector,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        self.state = SessionState::Connecting;
        info!("Connecting to {}", self.config.endpoint);

        let subscribed = tokio::select! {
            _ = cancel.cancelled() => {
                self.state = SessionState::Closed;
                return Ok(());
            }
            result = timeout(self.config.connect_timeout, connector.subscribe()) => result,
        };
        let mut stream = match subscribed {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = SessionState::Failed;
                return Err(e);
            }
            Err(_) => {
                self.state = SessionState::Failed;
                return Err(TransportError::Timeout(self.config.connect_timeout));
            }
        };

        self.state = SessionState::Subscribed;
        self.subscribed = true;
        info!("Subscribed to entry stream");
        self.processor.on_subscribed();

        self.state = SessionState::Streaming;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Stream session cancelled");
                    self.state = SessionState::Closed;
                    return Ok(());
                }
                next = stream.next_frame() => next,
            };

            match next {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => {
                    info!(
                        "Entry stream ended after {} frames",
                        self.frames_received
                    );
                    self.state = SessionState::Closed;
                    return Ok(());
                }
                Err(e) => {
                    self.state = SessionState::Failed;
                    return Err(e);
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: RawFrame) {
        self.frames_received += 1;

        let previous = self.stats.observe_slot(frame.slot);
        if let Some(gap) = detect_gap(previous, frame.slot, self.config.slot_gap_threshold) {
            warn!(
                "Slot gap detected: {} -> {} ({} slots), data may have been lost",
                previous, frame.slot, gap
            );
        }

        match self.dispatcher.submit(frame) {
            Ok(()) => {}
            Err(SubmitError::Saturated(capacity)) => {
                warn!("Dispatcher saturated at {} tasks, frame dropped", capacity);
            }
            Err(SubmitError::Closed) => {
                debug!("Dispatcher closed, frame dropped");
            }
        }
    }

    /// Wait for frames already handed to workers
    pub async fn drain(&self) {
        self.dispatcher.drain().await;
    }
}

/// Restart stream sessions until cancelled.
///
/// Failed sessions are followed by a reconnect after the fixed delay. A
/// cleanly closed session also waits the delay but is not counted as a
/// reconnect. With `max_reconnect_attempts` set, that many consecutive
/// failures without a successful subscription end the loop with an error.
pub async fn run_supervisor<P: FrameProcessor>(
    connector: Arc<dyn FeedConnector>,
    processor: Arc<P>,
    stats: Arc<Stats>,
    config: StreamConfig,
    dispatcher: DispatcherConfig,
    cancel: CancellationToken,
) -> Result<(), TransportError> {
    let mut consecutive_failures: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let mut session = StreamSession::new(
            config.clone(),
            Arc::clone(&processor),
            Arc::clone(&stats),
            dispatcher,
        );
        let result = session.run(connector.as_ref(), &cancel).await;
        if session.reached_subscription() {
            consecutive_failures = 0;
        }

        match result {
            Ok(()) => {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                info!(
                    "Stream closed, reconnecting in {:?}",
                    config.reconnect_delay
                );
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                if let Some(max) = config.max_reconnect_attempts {
                    if consecutive_failures > max {
                        error!("Stream failed: {}; giving up after {} attempts", e, max);
                        return Err(TransportError::MaxReconnectAttemptsExceeded(max));
                    }
                }
                let reconnects = stats.record_reconnect();
                error!(
                    "Stream failed: {}; reconnecting in {:?} (reconnect #{})",
                    e, config.reconnect_delay, reconnects
                );
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = sleep(config.reconnect_delay) => {}
        }
    }
}
