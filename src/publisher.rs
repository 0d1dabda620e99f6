//! Match Reporting
//!
//! Builds structured events for transactions that touch a watched address and
//! hands them to reporters: the tracing log, and optionally a Redis channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::decoder::Transaction;
use crate::filter::{classify_accounts, describe_compiled, program_name};
use crate::types::Pubkey;

/// Instruction data bytes shown in hex in the instruction table
pub const DATA_PREVIEW_BYTES: usize = 32;

/// Default Redis channel for match events
pub const DEFAULT_CHANNEL: &str = "shred_matches";

/// Errors that can occur during publishing
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A watched address found in a transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchedAddress {
    pub address: String,
    pub label: String,
}

/// One row of the account table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountRow {
    pub index: usize,
    pub address: String,
    pub writable: bool,
    pub signer: bool,
    pub fee_payer: bool,
}

/// One row of the instruction table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstructionRow {
    pub index: usize,
    /// Program address, empty when the index is outside the key table
    pub program_id: String,
    pub program_name: String,
    pub accounts: Vec<u8>,
    pub data_len: usize,
    /// Hex of at most the first [`DATA_PREVIEW_BYTES`] bytes of data
    pub data_preview: String,
    pub description: Option<String>,
}

/// Event emitted for every transaction that references a watched address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvent {
    pub slot: u64,
    /// 1-based position of the transaction within its entry
    pub tx_index: usize,
    pub tx_count: usize,
    /// First signature, base58
    pub signature: String,
    pub matched_addresses: Vec<MatchedAddress>,
    pub account_table: Vec<AccountRow>,
    pub instruction_table: Vec<InstructionRow>,
    pub recent_blockhash: String,
    pub estimated_size: usize,
    /// Unix timestamp in milliseconds when the match was found
    pub timestamp: u64,
}

impl MatchEvent {
    /// Build the event for transaction `tx_index` (0-based) of an entry
    pub fn new(
        slot: u64,
        tx_index: usize,
        tx_count: usize,
        tx: &Transaction,
        matches: &BTreeMap<Pubkey, String>,
    ) -> Self {
        let message = &tx.message;

        let account_table = classify_accounts(message)
            .into_iter()
            .zip(&message.account_keys)
            .enumerate()
            .map(|(index, (access, key))| AccountRow {
                index,
                address: key.to_string(),
                writable: access.is_writable(),
                signer: access.is_signer(),
                fee_payer: index == 0,
            })
            .collect();

        let instruction_table = message
            .instructions
            .iter()
            .enumerate()
            .map(|(index, ix)| {
                let program = message.program_id(ix);
                InstructionRow {
                    index,
                    program_id: program.map(|p| p.to_string()).unwrap_or_default(),
                    program_name: program.map(program_name).unwrap_or("").to_string(),
                    accounts: ix.accounts.clone(),
                    data_len: ix.data.len(),
                    data_preview: hex::encode(&ix.data[..ix.data.len().min(DATA_PREVIEW_BYTES)]),
                    description: describe_compiled(message, ix),
                }
            })
            .collect();

        MatchEvent {
            slot,
            tx_index: tx_index + 1,
            tx_count,
            signature: tx.id().map(|s| s.to_string()).unwrap_or_default(),
            matched_addresses: matches
                .iter()
                .map(|(address, label)| MatchedAddress {
                    address: address.to_string(),
                    label: label.clone(),
                })
                .collect(),
            account_table,
            instruction_table,
            recent_blockhash: message.recent_blockhash.to_string(),
            estimated_size: tx.estimated_size(),
            timestamp: current_timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Get current timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Sink for match events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchReporter: Send + Sync {
    async fn report(&self, event: &MatchEvent) -> Result<(), PublishError>;
}

/// Writes match events to the tracing log
#[derive(Debug, Clone, Default)]
pub struct LogReporter {
    /// Emit the event as one JSON line instead of a table
    pub json: bool,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json() -> Self {
        Self { json: true }
    }
}

#[async_trait]
impl MatchReporter for LogReporter {
    async fn report(&self, event: &MatchEvent) -> Result<(), PublishError> {
        if self.json {
            info!(target: "shredwatch::matches", "{}", event.to_json()?);
            return Ok(());
        }

        info!(
            slot = event.slot,
            "Match in tx {}/{}: {}",
            event.tx_index,
            event.tx_count,
            event.signature
        );
        for m in &event.matched_addresses {
            info!("  watched: {} ({})", m.address, m.label);
        }
        for row in &event.account_table {
            info!(
                "  account {}: {} [{}, {}]{}",
                row.index,
                row.address,
                if row.writable { "writable" } else { "read-only" },
                if row.signer { "signer" } else { "non-signer" },
                if row.fee_payer { " (fee payer)" } else { "" }
            );
        }
        for row in &event.instruction_table {
            info!(
                "  instruction {}: program {} ({}), {} accounts, {} data bytes",
                row.index,
                row.program_id,
                row.program_name,
                row.accounts.len(),
                row.data_len
            );
            if !row.data_preview.is_empty() {
                info!("    data: {}", row.data_preview);
            }
            if let Some(description) = &row.description {
                info!("    {}", description);
            }
        }
        info!(
            "  recent blockhash: {}, estimated size: {} bytes",
            event.recent_blockhash, event.estimated_size
        );
        Ok(())
    }
}

/// Redis publisher for match events
pub struct RedisPublisher {
    connection: MultiplexedConnection,
    channel: String,
}

impl RedisPublisher {
    /// Create a new publisher with a Redis connection
    pub fn new(connection: MultiplexedConnection, channel: impl Into<String>) -> Self {
        Self {
            connection,
            channel: channel.into(),
        }
    }

    /// Open a connection to `url` and publish on `channel`
    pub async fn connect(url: &str, channel: impl Into<String>) -> Result<Self, PublishError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(connection, channel))
    }

    /// Publish a pre-formatted message; returns the subscriber count
    pub async fn publish_message(&self, event: &MatchEvent) -> Result<i64, PublishError> {
        let json = event.to_json()?;
        let mut connection = self.connection.clone();
        let subscribers: i64 = connection.publish(&self.channel, &json).await?;
        Ok(subscribers)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl MatchReporter for RedisPublisher {
    async fn report(&self, event: &MatchEvent) -> Result<(), PublishError> {
        self.publish_message(event).await.map(|_| ())
    }
}

/// Sends each event to every inner reporter; one failing does not stop the others
#[derive(Default, Clone)]
pub struct FanoutReporter {
    reporters: Vec<Arc<dyn MatchReporter>>,
}

impl FanoutReporter {
    pub fn new(reporters: Vec<Arc<dyn MatchReporter>>) -> Self {
        Self { reporters }
    }

    pub fn push(&mut self, reporter: Arc<dyn MatchReporter>) {
        self.reporters.push(reporter);
    }

    pub fn len(&self) -> usize {
        self.reporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reporters.is_empty()
    }
}

#[async_trait]
impl MatchReporter for FanoutReporter {
    async fn report(&self, event: &MatchEvent) -> Result<(), PublishError> {
        let mut first_error = None;
        for reporter in &self.reporters {
            if let Err(e) = reporter.report(event).await {
                warn!("Reporter failed for {}: {}", event.signature, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
