//! Transaction Decoder
//!
//! Decodes legacy and v0 transactions from a shared byte cursor: signatures,
//! optional version prefix, message header, account-key table, recent blockhash,
//! compiled instructions and, for v0, address-table lookups.
//! Every read is bounds-checked; a failed read never moves the cursor.

use thiserror::Error;

use crate::types::{Hash, Pubkey, Signature, PUBKEY_BYTES, SIGNATURE_BYTES};

/// Errors that can occur while decoding an entry or a transaction
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame too small to hold an entry: {0} bytes")]
    TooSmall(usize),

    #[error("Unreasonable num_hashes: {0}")]
    UnreasonableHashCount(u64),

    #[error("Unreasonable transaction count: {0}")]
    UnreasonableTxnCount(u64),

    #[error("Not enough bytes for {txns} transactions: need ~{needed} bytes, {remaining} remaining")]
    InsufficientBytes {
        txns: u64,
        needed: u64,
        remaining: usize,
    },

    #[error("First transaction is corrupt: {0}")]
    FirstTransactionCorrupt(#[source] Box<DecodeError>),

    #[error("Truncated at offset {offset}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("Transaction has no signatures")]
    NoSignatures,

    #[error("Invalid compact length encoding at offset {0}")]
    InvalidCompactLength(usize),

    #[error("Header requires {required} accounts but only {available} keys present")]
    InvalidHeader { required: usize, available: usize },

    #[error("Unsupported message version: {0}")]
    UnsupportedVersion(u8),
}

/// Byte cursor over an untrusted buffer
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset from the start of the buffer
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take `n` bytes, or fail without advancing
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(self.truncated(n));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Next byte without advancing
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    /// Read a compact-u16 length prefix.
    ///
    /// Seven data bits per byte, high bit set on every byte but the last,
    /// at most three bytes. Over-long and non-canonical encodings are rejected.
    pub fn read_compact_u16(&mut self) -> Result<usize, DecodeError> {
        let start = self.pos;
        let mut value: u32 = 0;
        for i in 0..3 {
            let Some(&byte) = self.data.get(start + i) else {
                return Err(DecodeError::Truncated {
                    offset: start,
                    needed: i + 1,
                    remaining: self.data.len() - start,
                });
            };
            value |= u32::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                // a trailing zero byte is an alias of a shorter encoding
                if i > 0 && byte == 0 {
                    return Err(DecodeError::InvalidCompactLength(start));
                }
                if value > u32::from(u16::MAX) {
                    return Err(DecodeError::InvalidCompactLength(start));
                }
                self.pos = start + i + 1;
                return Ok(value as usize);
            }
        }
        Err(DecodeError::InvalidCompactLength(start))
    }

    /// Read a compact-length-prefixed sequence of fixed-width items.
    ///
    /// The whole sequence is bounds-checked before anything is allocated, so
    /// a corrupt length cannot trigger a large allocation.
    fn read_fixed_seq<const N: usize>(&mut self) -> Result<Vec<[u8; N]>, DecodeError> {
        let start = self.pos;
        let len = self.read_compact_u16()?;
        let needed = len * N;
        if needed > self.remaining() {
            let err = self.truncated(needed);
            self.pos = start;
            return Err(err);
        }
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_array::<N>()?);
        }
        Ok(items)
    }

    /// Read a compact-length-prefixed byte blob
    fn read_blob(&mut self) -> Result<&'a [u8], DecodeError> {
        let start = self.pos;
        let len = self.read_compact_u16()?;
        self.read_bytes(len).inspect_err(|_| self.pos = start)
    }

    fn truncated(&self, needed: usize) -> DecodeError {
        DecodeError::Truncated {
            offset: self.pos,
            needed,
            remaining: self.remaining(),
        }
    }
}

/// The three signer/read-only counts that partition the account-key table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
}

/// One instruction, referencing accounts by index into the key table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

/// High bit of the first message byte marks a versioned message
pub const VERSION_PREFIX_MASK: u8 = 0x80;

/// Message layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageVersion {
    #[default]
    Legacy,
    V0,
}

/// Accounts loaded from an on-chain address lookup table (v0 only)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressTableLookup {
    pub account_key: Pubkey,
    pub writable_indexes: Vec<u8>,
    pub readonly_indexes: Vec<u8>,
}

/// Transaction message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub version: MessageVersion,
    pub header: MessageHeader,
    /// Static keys only; lookup-table accounts are not resolved
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
    pub address_table_lookups: Vec<AddressTableLookup>,
}

impl Message {
    /// Resolve the program invoked by an instruction, if its index is in range
    pub fn program_id(&self, instruction: &CompiledInstruction) -> Option<&Pubkey> {
        self.account_keys
            .get(usize::from(instruction.program_id_index))
    }
}

/// Decoded transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Signatures, at least one; the first identifies the transaction
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    /// The transaction id (first signature)
    pub fn id(&self) -> Option<&Signature> {
        self.signatures.first()
    }

    /// Rough wire size used for reporting.
    ///
    /// Assumes one-byte length prefixes and adds a fixed 10 bytes of slack;
    /// this is an estimate, not the exact serialized length.
    pub fn estimated_size(&self) -> usize {
        let signatures = self.signatures.len() * SIGNATURE_BYTES;
        let header = 3;
        let blockhash = PUBKEY_BYTES;
        let accounts = self.message.account_keys.len() * PUBKEY_BYTES;
        let instructions: usize = self
            .message
            .instructions
            .iter()
            .map(|ix| 2 + ix.accounts.len() + ix.data.len())
            .sum();
        let lookups: usize = match self.message.version {
            MessageVersion::Legacy => 0,
            MessageVersion::V0 => {
                1 + 1
                    + self
                        .message
                        .address_table_lookups
                        .iter()
                        .map(|l| PUBKEY_BYTES + 2 + l.writable_indexes.len() + l.readonly_indexes.len())
                        .sum::<usize>()
            }
        };
        let other = 10;

        signatures + header + blockhash + accounts + instructions + lookups + other
    }
}

/// Decode one transaction, advancing the cursor by exactly the bytes consumed
pub fn decode_transaction(cursor: &mut Cursor<'_>) -> Result<Transaction, DecodeError> {
    let start = cursor.position();
    let result = decode_transaction_inner(cursor);
    if result.is_err() {
        cursor.pos = start;
    }
    result
}

fn decode_transaction_inner(cursor: &mut Cursor<'_>) -> Result<Transaction, DecodeError> {
    let signatures: Vec<Signature> = cursor
        .read_fixed_seq::<SIGNATURE_BYTES>()?
        .into_iter()
        .map(Signature)
        .collect();
    if signatures.is_empty() {
        return Err(DecodeError::NoSignatures);
    }

    let message = decode_message(cursor)?;

    Ok(Transaction {
        signatures,
        message,
    })
}

fn decode_message(cursor: &mut Cursor<'_>) -> Result<Message, DecodeError> {
    let version = match cursor.peek_u8() {
        Some(byte) if byte & VERSION_PREFIX_MASK != 0 => {
            cursor.read_u8()?;
            match byte & !VERSION_PREFIX_MASK {
                0 => MessageVersion::V0,
                other => return Err(DecodeError::UnsupportedVersion(other)),
            }
        }
        _ => MessageVersion::Legacy,
    };

    let [num_required_signatures, num_readonly_signed, num_readonly_unsigned] =
        cursor.read_array::<3>()?;
    let header = MessageHeader {
        num_required_signatures,
        num_readonly_signed,
        num_readonly_unsigned,
    };

    let account_keys: Vec<Pubkey> = cursor
        .read_fixed_seq::<PUBKEY_BYTES>()?
        .into_iter()
        .map(Pubkey)
        .collect();

    let required =
        usize::from(num_required_signatures) + usize::from(num_readonly_unsigned);
    if required > account_keys.len() {
        return Err(DecodeError::InvalidHeader {
            required,
            available: account_keys.len(),
        });
    }

    let recent_blockhash = Hash(cursor.read_array::<PUBKEY_BYTES>()?);

    let count = cursor.read_compact_u16()?;
    // every instruction needs at least three bytes: index + two empty prefixes
    if count * 3 > cursor.remaining() {
        return Err(cursor.truncated(count * 3));
    }
    let mut instructions = Vec::with_capacity(count);
    for _ in 0..count {
        let program_id_index = cursor.read_u8()?;
        let accounts = cursor.read_blob()?.to_vec();
        let data = cursor.read_blob()?.to_vec();
        instructions.push(CompiledInstruction {
            program_id_index,
            accounts,
            data,
        });
    }

    let address_table_lookups = match version {
        MessageVersion::Legacy => Vec::new(),
        MessageVersion::V0 => decode_lookups(cursor)?,
    };

    Ok(Message {
        version,
        header,
        account_keys,
        recent_blockhash,
        instructions,
        address_table_lookups,
    })
}

fn decode_lookups(cursor: &mut Cursor<'_>) -> Result<Vec<AddressTableLookup>, DecodeError> {
    let count = cursor.read_compact_u16()?;
    // table key plus two empty index lists
    let min_len = PUBKEY_BYTES + 2;
    if count * min_len > cursor.remaining() {
        return Err(cursor.truncated(count * min_len));
    }
    let mut lookups = Vec::with_capacity(count);
    for _ in 0..count {
        let account_key = Pubkey(cursor.read_array::<PUBKEY_BYTES>()?);
        let writable_indexes = cursor.read_blob()?.to_vec();
        let readonly_indexes = cursor.read_blob()?.to_vec();
        lookups.push(AddressTableLookup {
            account_key,
            writable_indexes,
            readonly_indexes,
        });
    }
    Ok(lookups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{encode_transaction, write_compact_u16};

    fn sample_transaction() -> Transaction {
        Transaction {
            signatures: vec![Signature::new([0xaa; 64])],
            message: Message {
                header: MessageHeader {
                    num_required_signatures: 1,
                    num_readonly_signed: 0,
                    num_readonly_unsigned: 1,
                },
                account_keys: vec![Pubkey::new([1; 32]), Pubkey::new([2; 32]), Pubkey::default()],
                recent_blockhash: Hash::new([9; 32]),
                instructions: vec![CompiledInstruction {
                    program_id_index: 2,
                    accounts: vec![0, 1],
                    data: vec![2, 0, 0, 0, 0x40, 0x42, 0x0f, 0, 0, 0, 0, 0],
                }],
                ..Default::default()
            },
        }
    }

    fn sample_v0_transaction() -> Transaction {
        let mut tx = sample_transaction();
        tx.message.version = MessageVersion::V0;
        tx.message.address_table_lookups = vec![AddressTableLookup {
            account_key: Pubkey::new([7; 32]),
            writable_indexes: vec![0, 3],
            readonly_indexes: vec![1],
        }];
        tx
    }

    fn compact(value: u16) -> Vec<u8> {
        let mut out = Vec::new();
        write_compact_u16(&mut out, value);
        out
    }

    // ==================== compact-u16 tests ====================

    #[test]
    fn test_compact_single_byte() {
        let bytes = [0x05];
        let mut cursor = Cursor::new(&bytes);
        assert_eq!(cursor.read_compact_u16().unwrap(), 5);
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_compact_two_bytes() {
        // 0x80 = 128 -> [0x80, 0x01]
        let bytes = [0x80, 0x01];
        let mut cursor = Cursor::new(&bytes);
        assert_eq!(cursor.read_compact_u16().unwrap(), 128);
        assert_eq!(cursor.position(), 2);
    }

    #[test]
    fn test_compact_max_value() {
        let bytes = [0xff, 0xff, 0x03];
        let mut cursor = Cursor::new(&bytes);
        assert_eq!(cursor.read_compact_u16().unwrap(), 0xffff);
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn test_compact_boundaries_match_encoder() {
        for value in [0u16, 1, 0x7f, 0x80, 0x3fff, 0x4000, 0xffff] {
            let bytes = compact(value);
            let mut cursor = Cursor::new(&bytes);
            assert_eq!(cursor.read_compact_u16().unwrap(), usize::from(value));
            assert!(cursor.is_empty(), "value {} left bytes behind", value);
        }
    }

    #[test]
    fn test_compact_rejects_overflow() {
        let bytes = [0xff, 0xff, 0x04];
        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            cursor.read_compact_u16(),
            Err(DecodeError::InvalidCompactLength(0))
        ));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_compact_rejects_four_byte_encoding() {
        let bytes = [0x80, 0x80, 0x80, 0x01];
        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            cursor.read_compact_u16(),
            Err(DecodeError::InvalidCompactLength(_))
        ));
    }

    #[test]
    fn test_compact_rejects_alias_encoding() {
        // 5 encoded with a redundant zero continuation byte
        let bytes = [0x85, 0x00];
        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            cursor.read_compact_u16(),
            Err(DecodeError::InvalidCompactLength(_))
        ));
    }

    #[test]
    fn test_compact_truncated_does_not_advance() {
        let bytes = [0x80];
        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            cursor.read_compact_u16(),
            Err(DecodeError::Truncated { offset: 0, .. })
        ));
        assert_eq!(cursor.position(), 0);
    }

    // ==================== Cursor tests ====================

    #[test]
    fn test_read_bytes_out_of_bounds_does_not_advance() {
        let bytes = [1, 2, 3];
        let mut cursor = Cursor::new(&bytes);
        cursor.read_u8().unwrap();
        let err = cursor.read_bytes(5).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Truncated {
                offset: 1,
                needed: 5,
                remaining: 2
            }
        ));
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_read_u64_little_endian() {
        let bytes = 0x0102_0304_0506_0708u64.to_le_bytes();
        let mut cursor = Cursor::new(&bytes);
        assert_eq!(cursor.read_u64_le().unwrap(), 0x0102_0304_0506_0708);
    }

    // ==================== decode_transaction tests ====================

    #[test]
    fn test_decode_transaction_roundtrip() {
        let tx = sample_transaction();
        let bytes = encode_transaction(&tx);
        let mut cursor = Cursor::new(&bytes);
        let decoded = decode_transaction(&mut cursor).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(cursor.position(), bytes.len());
    }

    #[test]
    fn test_decode_consecutive_transactions_share_cursor() {
        let first = sample_transaction();
        let mut second = sample_transaction();
        second.signatures[0] = Signature::new([0xbb; 64]);
        second.message.instructions[0].data = vec![];

        let mut bytes = encode_transaction(&first);
        let first_len = bytes.len();
        bytes.extend(encode_transaction(&second));

        let mut cursor = Cursor::new(&bytes);
        assert_eq!(decode_transaction(&mut cursor).unwrap(), first);
        assert_eq!(cursor.position(), first_len);
        assert_eq!(decode_transaction(&mut cursor).unwrap(), second);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_decode_no_signatures() {
        let bytes = [0x00, 0x01, 0x00, 0x00];
        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            decode_transaction(&mut cursor),
            Err(DecodeError::NoSignatures)
        ));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_decode_signature_count_beyond_buffer() {
        // claims 200 signatures with only a handful of bytes behind it
        let mut bytes = compact(200);
        bytes.extend_from_slice(&[0u8; 64]);
        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            decode_transaction(&mut cursor),
            Err(DecodeError::Truncated { .. })
        ));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_decode_every_truncation_point_fails_cleanly() {
        let bytes = encode_transaction(&sample_transaction());
        for cut in 0..bytes.len() {
            let mut cursor = Cursor::new(&bytes[..cut]);
            let result = decode_transaction(&mut cursor);
            assert!(result.is_err(), "cut at {} decoded", cut);
            assert_eq!(cursor.position(), 0);
        }
    }

    #[test]
    fn test_decode_header_exceeding_keys() {
        let mut tx = sample_transaction();
        tx.message.header.num_required_signatures = 3;
        tx.message.header.num_readonly_unsigned = 1;
        let bytes = encode_transaction(&tx);
        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            decode_transaction(&mut cursor),
            Err(DecodeError::InvalidHeader {
                required: 4,
                available: 3
            })
        ));
    }

    #[test]
    fn test_decode_instruction_with_large_data_blob() {
        let mut tx = sample_transaction();
        tx.message.instructions[0].data = vec![0x5a; 300];
        let bytes = encode_transaction(&tx);
        let mut cursor = Cursor::new(&bytes);
        let decoded = decode_transaction(&mut cursor).unwrap();
        assert_eq!(decoded.message.instructions[0].data.len(), 300);
    }

    // ==================== v0 message tests ====================

    #[test]
    fn test_decode_v0_roundtrip() {
        let tx = sample_v0_transaction();
        let bytes = encode_transaction(&tx);
        // version prefix sits right after the single signature
        assert_eq!(bytes[1 + 64], 0x80);

        let mut cursor = Cursor::new(&bytes);
        let decoded = decode_transaction(&mut cursor).unwrap();
        assert_eq!(decoded, tx);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_decode_v0_with_empty_lookups() {
        let mut tx = sample_transaction();
        tx.message.version = MessageVersion::V0;
        let legacy_len = encode_transaction(&sample_transaction()).len();
        let bytes = encode_transaction(&tx);
        // prefix byte plus an empty lookup list
        assert_eq!(bytes.len(), legacy_len + 2);

        let mut cursor = Cursor::new(&bytes);
        let decoded = decode_transaction(&mut cursor).unwrap();
        assert_eq!(decoded.message.version, MessageVersion::V0);
        assert!(decoded.message.address_table_lookups.is_empty());
        assert_eq!(decoded.message.account_keys, tx.message.account_keys);
    }

    #[test]
    fn test_decode_legacy_then_v0_share_cursor() {
        let legacy = sample_transaction();
        let v0 = sample_v0_transaction();
        let mut bytes = encode_transaction(&legacy);
        bytes.extend(encode_transaction(&v0));

        let mut cursor = Cursor::new(&bytes);
        assert_eq!(decode_transaction(&mut cursor).unwrap(), legacy);
        assert_eq!(decode_transaction(&mut cursor).unwrap(), v0);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut bytes = encode_transaction(&sample_transaction());
        // legacy header starts with num_required_signatures = 1; insert version 1
        bytes.insert(1 + 64, 0x81);
        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            decode_transaction(&mut cursor),
            Err(DecodeError::UnsupportedVersion(1))
        ));
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_decode_v0_every_truncation_point_fails_cleanly() {
        let bytes = encode_transaction(&sample_v0_transaction());
        for cut in 0..bytes.len() {
            let mut cursor = Cursor::new(&bytes[..cut]);
            assert!(decode_transaction(&mut cursor).is_err(), "cut at {} decoded", cut);
            assert_eq!(cursor.position(), 0);
        }
    }

    #[test]
    fn test_decode_v0_lookup_count_beyond_buffer() {
        let mut tx = sample_transaction();
        tx.message.version = MessageVersion::V0;
        let mut bytes = encode_transaction(&tx);
        // replace the empty lookup list with a claim of 50 tables
        bytes.pop();
        bytes.push(50);
        let mut cursor = Cursor::new(&bytes);
        assert!(matches!(
            decode_transaction(&mut cursor),
            Err(DecodeError::Truncated { .. })
        ));
    }

    // ==================== Transaction helper tests ====================

    #[test]
    fn test_estimated_size() {
        let tx = sample_transaction();
        // 64 + 3 + 32 + 3*32 + (2 + 2 + 12) + 10
        assert_eq!(tx.estimated_size(), 64 + 3 + 32 + 96 + 16 + 10);

        // version byte, lookup count, one table with three indexes
        let v0 = sample_v0_transaction();
        assert_eq!(v0.estimated_size(), tx.estimated_size() + 2 + 32 + 2 + 3);
    }

    #[test]
    fn test_program_id_lookup() {
        let tx = sample_transaction();
        let ix = &tx.message.instructions[0];
        assert_eq!(tx.message.program_id(ix), Some(&Pubkey::default()));

        let bad = CompiledInstruction {
            program_id_index: 42,
            ..Default::default()
        };
        assert_eq!(tx.message.program_id(&bad), None);
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::TooSmall(12);
        assert!(err.to_string().contains("12"));

        let err = DecodeError::FirstTransactionCorrupt(Box::new(DecodeError::NoSignatures));
        assert!(err.to_string().contains("no signatures"));
    }
}
