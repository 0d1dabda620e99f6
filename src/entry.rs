//! Entry Frame Decoder
//!
//! Turns a raw frame from the feed into an [`Entry`]: hash count, digest and
//! the transactions it carries. Two framings are supported; production feeds
//! use the headered one, which carries an opaque 8-byte prefix.

use tracing::debug;

use crate::decoder::{decode_transaction, Cursor, DecodeError, Transaction};
use crate::types::{Hash, PUBKEY_BYTES};

/// Smallest buffer that can hold num_hashes + hash + transaction count
pub const MIN_ENTRY_SIZE: usize = 8 + PUBKEY_BYTES + 8;

/// Length of the opaque prefix on headered frames
pub const FRAME_HEADER_LEN: usize = 8;

/// Upper bound on num_hashes before a frame is treated as corrupt
pub const MAX_NUM_HASHES: u64 = 1_000_000;

/// Upper bound on the declared transaction count
pub const MAX_TXNS_PER_ENTRY: u64 = 10_000;

/// Assumed minimum bytes per transaction for the up-front size check
pub const MIN_TX_BYTES: u64 = 100;

/// Frame layouts understood by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// 8-byte opaque header followed by a standard entry
    #[default]
    Headered,
    /// num_hashes, hash, transaction count, transactions
    Standard,
}

impl Framing {
    /// Bytes skipped before the standard layout begins
    pub fn prefix_len(&self) -> usize {
        match self {
            Framing::Headered => FRAME_HEADER_LEN,
            Framing::Standard => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Framing::Headered => "headered",
            Framing::Standard => "standard",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "headered" => Some(Framing::Headered),
            "standard" => Some(Framing::Standard),
            _ => None,
        }
    }
}

/// A decoded ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Entry {
    pub num_hashes: u64,
    pub hash: Hash,
    pub transactions: Vec<Transaction>,
}

/// Result of decoding a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    pub entry: Entry,
    /// Transaction count the frame declared
    pub declared_txns: u64,
}

impl DecodedEntry {
    /// True when decoding stopped before the declared transaction count
    pub fn is_partial(&self) -> bool {
        (self.entry.transactions.len() as u64) < self.declared_txns
    }

    /// Declared transactions that were not decoded
    pub fn missing_txns(&self) -> u64 {
        self.declared_txns
            .saturating_sub(self.entry.transactions.len() as u64)
    }
}

/// Sanity bounds and framing used by [`EntryDecoder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    pub framing: Framing,
    pub max_hashes: u64,
    pub max_txns: u64,
    /// Per-transaction size floor for the up-front check; 0 disables it
    pub min_tx_bytes: u64,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            framing: Framing::default(),
            max_hashes: MAX_NUM_HASHES,
            max_txns: MAX_TXNS_PER_ENTRY,
            min_tx_bytes: MIN_TX_BYTES,
        }
    }
}

impl DecoderOptions {
    pub fn with_framing(framing: Framing) -> Self {
        Self {
            framing,
            ..Default::default()
        }
    }
}

/// Stateless frame decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryDecoder {
    options: DecoderOptions,
}

impl EntryDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }

    /// Decode one frame.
    ///
    /// A corrupt first transaction rejects the whole frame. A corrupt later
    /// transaction ends decoding and the transactions before it are returned;
    /// callers check [`DecodedEntry::is_partial`].
    pub fn decode(&self, bytes: &[u8]) -> Result<DecodedEntry, DecodeError> {
        if bytes.len() < MIN_ENTRY_SIZE {
            return Err(DecodeError::TooSmall(bytes.len()));
        }

        let mut cursor = Cursor::new(bytes);
        cursor.read_bytes(self.options.framing.prefix_len())?;

        let num_hashes = cursor.read_u64_le()?;
        if num_hashes > self.options.max_hashes {
            return Err(DecodeError::UnreasonableHashCount(num_hashes));
        }

        let hash = Hash(cursor.read_array::<PUBKEY_BYTES>()?);

        let declared_txns = cursor.read_u64_le()?;
        if declared_txns > self.options.max_txns {
            return Err(DecodeError::UnreasonableTxnCount(declared_txns));
        }

        let needed = declared_txns.saturating_mul(self.options.min_tx_bytes);
        if needed > cursor.remaining() as u64 {
            return Err(DecodeError::InsufficientBytes {
                txns: declared_txns,
                needed,
                remaining: cursor.remaining(),
            });
        }

        let mut transactions = Vec::with_capacity(declared_txns as usize);
        for index in 0..declared_txns {
            let offset = cursor.position();
            match decode_transaction(&mut cursor) {
                Ok(tx) => transactions.push(tx),
                Err(e) if index == 0 => {
                    return Err(DecodeError::FirstTransactionCorrupt(Box::new(e)));
                }
                Err(e) => {
                    debug!(
                        "Stopped at transaction {}/{} (offset {}): {}",
                        index + 1,
                        declared_txns,
                        offset,
                        e
                    );
                    break;
                }
            }
        }

        Ok(DecodedEntry {
            entry: Entry {
                num_hashes,
                hash,
                transactions,
            },
            declared_txns,
        })
    }
}

/// Decode a frame with the default (headered) framing and bounds
pub fn decode_entry(bytes: &[u8]) -> Result<DecodedEntry, DecodeError> {
    EntryDecoder::default().decode(bytes)
}
