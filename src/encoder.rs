//! Reference Encoder
//!
//! Serializes entries and transactions into the wire layout the decoders read.
//! Used to build fixtures for tests and benchmarks.

use crate::decoder::{
    AddressTableLookup, CompiledInstruction, MessageVersion, Transaction, VERSION_PREFIX_MASK,
};
use crate::entry::{Entry, Framing, FRAME_HEADER_LEN};

/// Append a compact-u16 length prefix
pub fn write_compact_u16(out: &mut Vec<u8>, mut value: u16) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    // lengths above u16::MAX are not representable on the wire
    let len = u16::try_from(len).unwrap_or(u16::MAX);
    write_compact_u16(out, len);
}

fn write_instruction(out: &mut Vec<u8>, ix: &CompiledInstruction) {
    out.push(ix.program_id_index);
    write_len(out, ix.accounts.len());
    out.extend_from_slice(&ix.accounts);
    write_len(out, ix.data.len());
    out.extend_from_slice(&ix.data);
}

fn write_lookup(out: &mut Vec<u8>, lookup: &AddressTableLookup) {
    out.extend_from_slice(lookup.account_key.as_bytes());
    write_len(out, lookup.writable_indexes.len());
    out.extend_from_slice(&lookup.writable_indexes);
    write_len(out, lookup.readonly_indexes.len());
    out.extend_from_slice(&lookup.readonly_indexes);
}

/// Serialize a transaction in the wire layout of its message version
pub fn encode_transaction(tx: &Transaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(tx.estimated_size());

    write_len(&mut out, tx.signatures.len());
    for sig in &tx.signatures {
        out.extend_from_slice(sig.as_bytes());
    }

    if tx.message.version == MessageVersion::V0 {
        out.push(VERSION_PREFIX_MASK);
    }

    let header = &tx.message.header;
    out.push(header.num_required_signatures);
    out.push(header.num_readonly_signed);
    out.push(header.num_readonly_unsigned);

    write_len(&mut out, tx.message.account_keys.len());
    for key in &tx.message.account_keys {
        out.extend_from_slice(key.as_bytes());
    }

    out.extend_from_slice(tx.message.recent_blockhash.as_bytes());

    write_len(&mut out, tx.message.instructions.len());
    for ix in &tx.message.instructions {
        write_instruction(&mut out, ix);
    }

    if tx.message.version == MessageVersion::V0 {
        write_len(&mut out, tx.message.address_table_lookups.len());
        for lookup in &tx.message.address_table_lookups {
            write_lookup(&mut out, lookup);
        }
    }

    out
}

/// Serialize an entry using the given framing.
///
/// Headered frames get a zeroed 8-byte prefix.
pub fn encode_entry(entry: &Entry, framing: Framing) -> Vec<u8> {
    let mut out = Vec::new();
    if framing == Framing::Headered {
        out.extend_from_slice(&[0u8; FRAME_HEADER_LEN]);
    }
    out.extend_from_slice(&entry.num_hashes.to_le_bytes());
    out.extend_from_slice(entry.hash.as_bytes());
    out.extend_from_slice(&(entry.transactions.len() as u64).to_le_bytes());
    for tx in &entry.transactions {
        out.extend(encode_transaction(tx));
    }
    out
}
