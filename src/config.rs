//! Pipeline Configuration
//!
//! Settings come from `SHREDWATCH_*` environment variables layered over the
//! defaults of each component. The watch list is read from a JSON file of
//! `{ "<base58 address>": "<label>" }`, or falls back to the built-in targets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::dispatcher::DispatcherConfig;
use crate::entry::{DecoderOptions, Framing};
use crate::filter::WatchList;
use crate::publisher::DEFAULT_CHANNEL;
use crate::stats::DEFAULT_STATS_INTERVAL;
use crate::stream::StreamConfig;
use crate::types::ParseKeyError;

pub const ENV_ENDPOINT: &str = "SHREDWATCH_ENDPOINT";
pub const ENV_CAPACITY: &str = "SHREDWATCH_CAPACITY";
pub const ENV_GAP_THRESHOLD: &str = "SHREDWATCH_GAP_THRESHOLD";
pub const ENV_STATS_INTERVAL_SECS: &str = "SHREDWATCH_STATS_INTERVAL_SECS";
pub const ENV_RECONNECT_DELAY_SECS: &str = "SHREDWATCH_RECONNECT_DELAY_SECS";
pub const ENV_MAX_RECONNECTS: &str = "SHREDWATCH_MAX_RECONNECTS";
pub const ENV_MIN_TX_BYTES: &str = "SHREDWATCH_MIN_TX_BYTES";
pub const ENV_FRAMING: &str = "SHREDWATCH_FRAMING";
pub const ENV_WATCHLIST: &str = "SHREDWATCH_WATCHLIST";
pub const ENV_REDIS_URL: &str = "SHREDWATCH_REDIS_URL";
pub const ENV_REDIS_CHANNEL: &str = "SHREDWATCH_REDIS_CHANNEL";
pub const ENV_JSON_MATCHES: &str = "SHREDWATCH_JSON_MATCHES";

/// Built-in watch targets used when no watch-list file is configured
pub const DEFAULT_TARGETS: &[(&str, &str)] =
    &[("TSLvdd1pWpHVjahSpsvCXUbgwsL3JAcvokwaKt1eokM", "pump")];

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidVar {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read watch list {path}: {source}")]
    WatchListIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse watch list {path}: {source}")]
    WatchListParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid watch list address: {0}")]
    InvalidAddress(#[from] ParseKeyError),
}

/// Everything the binary needs to run the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub stream: StreamConfig,
    pub dispatcher: DispatcherConfig,
    pub decoder: DecoderOptions,
    pub stats_interval: Duration,
    pub watchlist_path: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub redis_channel: String,
    /// Log each match as one JSON line
    pub json_matches: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            dispatcher: DispatcherConfig::default(),
            decoder: DecoderOptions::default(),
            stats_interval: DEFAULT_STATS_INTERVAL,
            watchlist_path: None,
            redis_url: None,
            redis_channel: DEFAULT_CHANNEL.to_string(),
            json_matches: false,
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source. Unset or empty variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(endpoint) = get(ENV_ENDPOINT) {
            config.stream.endpoint = endpoint;
        }
        if let Some(v) = get(ENV_CAPACITY) {
            let capacity: usize = parse_var(ENV_CAPACITY, &v)?;
            if capacity == 0 {
                return Err(invalid(ENV_CAPACITY, &v, "must be at least 1"));
            }
            config.dispatcher.capacity = capacity;
        }
        if let Some(v) = get(ENV_GAP_THRESHOLD) {
            config.stream.slot_gap_threshold = parse_var(ENV_GAP_THRESHOLD, &v)?;
        }
        if let Some(v) = get(ENV_STATS_INTERVAL_SECS) {
            let secs: u64 = parse_var(ENV_STATS_INTERVAL_SECS, &v)?;
            if secs == 0 {
                return Err(invalid(ENV_STATS_INTERVAL_SECS, &v, "must be at least 1"));
            }
            config.stats_interval = Duration::from_secs(secs);
        }
        if let Some(v) = get(ENV_RECONNECT_DELAY_SECS) {
            config.stream.reconnect_delay =
                Duration::from_secs(parse_var(ENV_RECONNECT_DELAY_SECS, &v)?);
        }
        if let Some(v) = get(ENV_MAX_RECONNECTS) {
            config.stream.max_reconnect_attempts = Some(parse_var(ENV_MAX_RECONNECTS, &v)?);
        }
        if let Some(v) = get(ENV_MIN_TX_BYTES) {
            config.decoder.min_tx_bytes = parse_var(ENV_MIN_TX_BYTES, &v)?;
        }
        if let Some(v) = get(ENV_FRAMING) {
            config.decoder.framing = Framing::from_name(v.trim())
                .ok_or_else(|| invalid(ENV_FRAMING, &v, "expected \"headered\" or \"standard\""))?;
        }
        if let Some(v) = get(ENV_WATCHLIST) {
            config.watchlist_path = Some(PathBuf::from(expand_path(v.trim())));
        }
        config.redis_url = get(ENV_REDIS_URL);
        if let Some(channel) = get(ENV_REDIS_CHANNEL) {
            config.redis_channel = channel;
        }
        if let Some(v) = get(ENV_JSON_MATCHES) {
            config.json_matches = parse_var(ENV_JSON_MATCHES, &v)?;
        }

        Ok(config)
    }

    /// Watch list from the configured file, or the built-in targets
    pub fn watchlist(&self) -> Result<WatchList, ConfigError> {
        match &self.watchlist_path {
            Some(path) => load_watchlist(path),
            None => {
                info!("No watch list file configured, using built-in targets");
                default_watchlist()
            }
        }
    }
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidVar {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(name, value, &e.to_string()))
}

/// Expand ~ to home directory in path
pub fn expand_path(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

pub fn default_watchlist() -> Result<WatchList, ConfigError> {
    Ok(WatchList::from_base58(DEFAULT_TARGETS.iter().copied())?)
}

/// Parse a watch list from its JSON text
pub fn parse_watchlist(json: &str, source: &str) -> Result<WatchList, ConfigError> {
    let pairs: BTreeMap<String, String> =
        serde_json::from_str(json).map_err(|e| ConfigError::WatchListParse {
            path: source.to_string(),
            source: e,
        })?;
    if pairs.is_empty() {
        warn!("Watch list {} is empty, nothing will match", source);
    }
    Ok(WatchList::from_base58(pairs)?)
}

/// Read a watch-list JSON file
pub fn load_watchlist(path: &Path) -> Result<WatchList, ConfigError> {
    let location = path.display().to_string();
    let json = std::fs::read_to_string(path).map_err(|e| ConfigError::WatchListIo {
        path: location.clone(),
        source: e,
    })?;
    let watchlist = parse_watchlist(&json, &location)?;
    info!("Loaded {} watched addresses from {}", watchlist.len(), location);
    Ok(watchlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    use crate::types::Pubkey;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ==================== PipelineConfig tests ====================

    #[test]
    fn test_defaults_without_variables() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.dispatcher.capacity, 10_000);
        assert_eq!(config.stats_interval, Duration::from_secs(10));
        assert_eq!(config.redis_channel, "shred_matches");
        assert!(config.redis_url.is_none());
        assert!(config.watchlist_path.is_none());
    }

    #[test]
    fn test_all_variables_applied() {
        let config = PipelineConfig::from_lookup(lookup(&[
            (ENV_ENDPOINT, "http://10.1.2.3:9999"),
            (ENV_CAPACITY, "256"),
            (ENV_GAP_THRESHOLD, "25"),
            (ENV_STATS_INTERVAL_SECS, "30"),
            (ENV_RECONNECT_DELAY_SECS, "1"),
            (ENV_MAX_RECONNECTS, "7"),
            (ENV_MIN_TX_BYTES, "0"),
            (ENV_FRAMING, "Standard"),
            (ENV_WATCHLIST, "/etc/shredwatch/targets.json"),
            (ENV_REDIS_URL, "redis://127.0.0.1:6379"),
            (ENV_REDIS_CHANNEL, "matches"),
            (ENV_JSON_MATCHES, "true"),
        ]))
        .unwrap();

        assert_eq!(config.stream.endpoint, "http://10.1.2.3:9999");
        assert_eq!(config.dispatcher.capacity, 256);
        assert_eq!(config.stream.slot_gap_threshold, 25);
        assert_eq!(config.stats_interval, Duration::from_secs(30));
        assert_eq!(config.stream.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.stream.max_reconnect_attempts, Some(7));
        assert_eq!(config.decoder.min_tx_bytes, 0);
        assert_eq!(config.decoder.framing, Framing::Standard);
        assert_eq!(
            config.watchlist_path,
            Some(PathBuf::from("/etc/shredwatch/targets.json"))
        );
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.redis_channel, "matches");
        assert!(config.json_matches);
    }

    #[test]
    fn test_empty_variables_keep_defaults() {
        let config =
            PipelineConfig::from_lookup(lookup(&[(ENV_CAPACITY, ""), (ENV_REDIS_URL, "  ")]))
                .unwrap();
        assert_eq!(config.dispatcher.capacity, 10_000);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = PipelineConfig::from_lookup(lookup(&[(ENV_CAPACITY, "lots")])).unwrap_err();
        match err {
            ConfigError::InvalidVar { name, value, .. } => {
                assert_eq!(name, ENV_CAPACITY);
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(
            PipelineConfig::from_lookup(lookup(&[(ENV_CAPACITY, "0")])),
            Err(ConfigError::InvalidVar { .. })
        ));
    }

    #[test]
    fn test_unknown_framing_is_rejected() {
        let err = PipelineConfig::from_lookup(lookup(&[(ENV_FRAMING, "big-endian")])).unwrap_err();
        assert!(err.to_string().contains(ENV_FRAMING));
    }

    // ==================== expand_path tests ====================

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = expand_path("~/targets/watch.json");
        assert!(!expanded.starts_with("~/"));
        assert!(expanded.ends_with("targets/watch.json"));
    }

    #[test]
    fn test_expand_path_leaves_other_paths() {
        assert_eq!(expand_path("/tmp/watch.json"), "/tmp/watch.json");
        assert_eq!(expand_path("/some/~dir/watch.json"), "/some/~dir/watch.json");
    }

    // ==================== Watch list tests ====================

    #[test]
    fn test_default_watchlist_has_pump() {
        let watchlist = default_watchlist().unwrap();
        assert_eq!(watchlist.len(), 1);
        let pump: Pubkey = DEFAULT_TARGETS[0].0.parse().unwrap();
        assert_eq!(watchlist.label(&pump), Some("pump"));
    }

    #[test]
    fn test_load_watchlist_from_file() {
        let a = Pubkey::new([1; 32]);
        let b = Pubkey::new([2; 32]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"{}": "alpha", "{}": "beta"}}"#, a, b).unwrap();

        let watchlist = load_watchlist(file.path()).unwrap();
        assert_eq!(watchlist.len(), 2);
        assert_eq!(watchlist.label(&a), Some("alpha"));
        assert_eq!(watchlist.label(&b), Some("beta"));
    }

    #[test]
    fn test_configured_path_takes_precedence() {
        let target = Pubkey::new([9; 32]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"{}": "custom"}}"#, target).unwrap();

        let config = PipelineConfig {
            watchlist_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let watchlist = config.watchlist().unwrap();
        assert_eq!(watchlist.len(), 1);
        assert_eq!(watchlist.label(&target), Some("custom"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_watchlist(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(ConfigError::WatchListIo { .. })));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let result = parse_watchlist("[1, 2, 3]", "inline");
        assert!(matches!(result, Err(ConfigError::WatchListParse { .. })));
    }

    #[test]
    fn test_bad_address_is_rejected() {
        let result = parse_watchlist(r#"{"not-base58-0OIl": "x"}"#, "inline");
        assert!(matches!(result, Err(ConfigError::InvalidAddress(_))));

        let result = parse_watchlist(r#"{"1111": "short"}"#, "inline");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidAddress(ParseKeyError::WrongLength { .. }))
        ));
    }
}
