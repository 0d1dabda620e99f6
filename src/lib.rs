//! Shredwatch Library
//!
//! This crate provides components for consuming a Solana shredstream entry feed,
//! decoding entries and transactions, matching account keys against a watch
//! list and reporting matches to the log and Redis.

pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod encoder;
pub mod entry;
pub mod filter;
pub mod grpc;
pub mod publisher;
pub mod stats;
pub mod stream;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigError, PipelineConfig};
pub use decoder::{decode_transaction, AddressTableLookup, DecodeError, Message, MessageVersion, Transaction};
pub use dispatcher::{Dispatcher, DispatcherConfig, EntryProcessor, FrameProcessor, RawFrame};
pub use entry::{decode_entry, DecodedEntry, DecoderOptions, Entry, EntryDecoder, Framing};
pub use filter::{match_addresses, WatchList};
pub use grpc::GrpcConnector;
pub use publisher::{FanoutReporter, LogReporter, MatchEvent, MatchReporter, RedisPublisher};
pub use stats::{Stats, StatsSnapshot};
pub use stream::{run_supervisor, StreamConfig, StreamSession, TransportError};
pub use types::{Hash, Pubkey, Signature};
