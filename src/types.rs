//! Fixed-width Primitives
//!
//! Account addresses, digests and signatures as they appear on the wire.
//! Addresses and digests render as base58, the canonical textual form.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Length of an account address or digest in bytes
pub const PUBKEY_BYTES: usize = 32;

/// Length of a transaction signature in bytes
pub const SIGNATURE_BYTES: usize = 64;

/// Errors produced when parsing a base58 address
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseKeyError {
    #[error("Invalid base58: {0}")]
    Base58(String),

    #[error("Wrong key length: expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// A 32-byte account address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pubkey(pub [u8; PUBKEY_BYTES]);

/// A 32-byte digest (entry hash, recent blockhash)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash(pub [u8; PUBKEY_BYTES]);

/// A 64-byte ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_BYTES]);

impl Pubkey {
    pub const fn new(bytes: [u8; PUBKEY_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBKEY_BYTES] {
        &self.0
    }
}

impl Hash {
    pub const fn new(bytes: [u8; PUBKEY_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBKEY_BYTES] {
        &self.0
    }
}

impl Signature {
    pub const fn new(bytes: [u8; SIGNATURE_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_BYTES] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_BYTES])
    }
}

fn decode_base58<const N: usize>(s: &str) -> Result<[u8; N], ParseKeyError> {
    let bytes = bs58::decode(s)
        .into_vec()
        .map_err(|e| ParseKeyError::Base58(e.to_string()))?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ParseKeyError::WrongLength { expected: N, actual })
}

impl FromStr for Pubkey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_base58(s).map(Self)
    }
}

impl FromStr for Hash {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_base58(s).map(Self)
    }
}

impl FromStr for Signature {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_base58(s).map(Self)
    }
}

macro_rules! impl_base58_fmt {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&bs58::encode(&self.0).into_string())
                }
            }

            impl fmt::Debug for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}({})", stringify!($ty), self)
                }
            }
        )*
    };
}

impl_base58_fmt!(Pubkey, Hash, Signature);
