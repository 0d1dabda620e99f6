//! Shredwatch
//!
//! Subscribes to a shredstream proxy and reports transactions that touch
//! watched addresses. Configured through `SHREDWATCH_*` environment variables.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shredwatch::publisher::{FanoutReporter, LogReporter, MatchReporter, RedisPublisher};
use shredwatch::stats::{log_snapshot, spawn_reporter};
use shredwatch::{EntryDecoder, EntryProcessor, GrpcConnector, PipelineConfig, Stats};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env()?;
    info!("Starting shredwatch");
    info!("Endpoint: {}", config.stream.endpoint);
    info!(
        "Framing: {}, worker capacity: {}, gap threshold: {}",
        config.decoder.framing.name(),
        config.dispatcher.capacity,
        config.stream.slot_gap_threshold
    );

    let watchlist = Arc::new(config.watchlist()?);
    if watchlist.is_empty() {
        warn!("Watch list is empty, no transactions will be reported");
    }

    let mut reporter = FanoutReporter::new(vec![Arc::new(LogReporter {
        json: config.json_matches,
    })]);
    if let Some(url) = &config.redis_url {
        match RedisPublisher::connect(url, config.redis_channel.clone()).await {
            Ok(publisher) => {
                info!("Publishing matches to Redis channel {}", publisher.channel());
                reporter.push(Arc::new(publisher));
            }
            Err(e) => error!("Failed to connect to Redis at {}: {}", url, e),
        }
    }
    let reporter: Arc<dyn MatchReporter> = Arc::new(reporter);

    let stats = Stats::shared();
    let processor = Arc::new(EntryProcessor::new(
        EntryDecoder::new(config.decoder),
        Arc::clone(&watchlist),
        reporter,
        Arc::clone(&stats),
    ));

    let cancel = CancellationToken::new();
    let stats_task = spawn_reporter(Arc::clone(&stats), config.stats_interval, cancel.clone());

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        shutdown.cancel();
    });

    let connector = Arc::new(GrpcConnector::new(config.stream.clone()));
    let result = shredwatch::run_supervisor(
        connector,
        processor,
        Arc::clone(&stats),
        config.stream.clone(),
        config.dispatcher,
        cancel.clone(),
    )
    .await;

    cancel.cancel();
    let _ = stats_task.await;
    log_snapshot(&stats.snapshot());
    info!("Shutting down shredwatch");

    result.map_err(Into::into)
}
