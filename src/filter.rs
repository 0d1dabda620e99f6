//! Watched Address Matching
//!
//! Scans a message's account-key table against the watch list and derives the
//! per-account access flags and instruction descriptions used for reporting.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::decoder::{CompiledInstruction, Message, MessageHeader};
use crate::types::{ParseKeyError, Pubkey};

/// Label used for programs missing from the known-program table
pub const UNKNOWN_PROGRAM: &str = "Unknown Program";

pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Read-only mapping of watched addresses to display labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList {
    entries: HashMap<Pubkey, String>,
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from base58 address/label pairs
    pub fn from_base58<I, A, L>(pairs: I) -> Result<Self, ParseKeyError>
    where
        I: IntoIterator<Item = (A, L)>,
        A: AsRef<str>,
        L: Into<String>,
    {
        let mut entries = HashMap::new();
        for (address, label) in pairs {
            entries.insert(address.as_ref().parse::<Pubkey>()?, label.into());
        }
        Ok(Self { entries })
    }

    pub fn insert(&mut self, address: Pubkey, label: impl Into<String>) {
        self.entries.insert(address, label.into());
    }

    pub fn label(&self, address: &Pubkey) -> Option<&str> {
        self.entries.get(address).map(String::as_str)
    }

    pub fn contains(&self, address: &Pubkey) -> bool {
        self.entries.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pubkey, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }
}

impl FromIterator<(Pubkey, String)> for WatchList {
    fn from_iter<T: IntoIterator<Item = (Pubkey, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Find every watched address in the message's account-key table
pub fn match_addresses(message: &Message, watchlist: &WatchList) -> BTreeMap<Pubkey, String> {
    let mut found = BTreeMap::new();
    if watchlist.is_empty() {
        return found;
    }
    for key in &message.account_keys {
        if let Some(label) = watchlist.label(key) {
            found.insert(*key, label.to_string());
        }
    }
    found
}

/// Signer / writable classification of one account-table slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountAccess {
    WritableSigner,
    ReadonlySigner,
    WritableNonSigner,
    ReadonlyNonSigner,
}

impl AccountAccess {
    /// Classify account `index` in a table of `num_keys` keys
    pub fn classify(header: &MessageHeader, index: usize, num_keys: usize) -> Self {
        let required = usize::from(header.num_required_signatures);
        let readonly_signed = usize::from(header.num_readonly_signed);
        let readonly_unsigned = usize::from(header.num_readonly_unsigned);

        if index < required {
            if index < required.saturating_sub(readonly_signed) {
                AccountAccess::WritableSigner
            } else {
                AccountAccess::ReadonlySigner
            }
        } else if index < num_keys.saturating_sub(readonly_unsigned) {
            AccountAccess::WritableNonSigner
        } else {
            AccountAccess::ReadonlyNonSigner
        }
    }

    pub fn is_signer(&self) -> bool {
        matches!(
            self,
            AccountAccess::WritableSigner | AccountAccess::ReadonlySigner
        )
    }

    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            AccountAccess::WritableSigner | AccountAccess::WritableNonSigner
        )
    }
}

/// Access classification for every key in the message, in table order
pub fn classify_accounts(message: &Message) -> Vec<AccountAccess> {
    let num_keys = message.account_keys.len();
    (0..num_keys)
        .map(|i| AccountAccess::classify(&message.header, i, num_keys))
        .collect()
}

/// Display names of well-known programs
static KNOWN_PROGRAMS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    map.insert(SYSTEM_PROGRAM_ID, "System Program");
    map.insert(TOKEN_PROGRAM_ID, "Token Program");
    map.insert(
        "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL",
        "Associated Token Account Program",
    );
    map.insert(
        "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s",
        "Metaplex Token Metadata",
    );
    map.insert("mv3ekLzLbnVPNxjSKvqBpU3ZeZXPQdEC3bp5MDEBG68", "Mango v3");
    map.insert("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin", "Serum DEX v3");
    map.insert("DjVE6JNiYqPL2QXyCUUh8rNjHrbz9hXHNYt99MQ59qw1", "Solend Program");
    map.insert("namesLPneVptA9Z5rqUDD9tMTWEJwofgaYwp8cawRkX", "Solana Name Service");
    map.insert("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4", "Jupiter Aggregator");
    map.insert("ComputeBudget111111111111111111111111111111", "Compute Budget Program");
    map.insert("So11111111111111111111111111111111111111112", "Wrapped SOL");
    map
});

/// Get the display name for a program id
pub fn program_name(program_id: &Pubkey) -> &'static str {
    KNOWN_PROGRAMS
        .get(program_id.to_string().as_str())
        .copied()
        .unwrap_or(UNKNOWN_PROGRAM)
}

fn system_instruction_name(kind: u32) -> Option<&'static str> {
    Some(match kind {
        0 => "CreateAccount",
        1 => "Assign",
        2 => "Transfer",
        3 => "CreateAccountWithSeed",
        4 => "AdvanceNonceAccount",
        5 => "WithdrawNonceAccount",
        6 => "InitializeNonceAccount",
        7 => "AuthorizeNonceAccount",
        8 => "Allocate",
        _ => return None,
    })
}

fn token_instruction_name(kind: u8) -> Option<&'static str> {
    Some(match kind {
        0 => "InitializeMint",
        1 => "InitializeAccount",
        2 => "InitializeMultisig",
        3 => "Transfer",
        4 => "Approve",
        5 => "Revoke",
        6 => "SetAuthority",
        7 => "MintTo",
        8 => "Burn",
        9 => "CloseAccount",
        10 => "FreezeAccount",
        11 => "ThawAccount",
        12 => "TransferChecked",
        _ => return None,
    })
}

fn read_u64_le(data: &[u8], at: usize) -> Option<u64> {
    let bytes: [u8; 8] = data.get(at..at + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// Describe a System or Token program instruction, if recognised
pub fn describe_instruction(program_id: &Pubkey, data: &[u8]) -> Option<String> {
    match program_id.to_string().as_str() {
        SYSTEM_PROGRAM_ID if data.len() > 4 => {
            let kind = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            let name = system_instruction_name(kind)?;
            match (kind, read_u64_le(data, 4)) {
                (2, Some(lamports)) => Some(format!(
                    "System {}: {} lamports ({:.9} SOL)",
                    name,
                    lamports,
                    lamports as f64 / LAMPORTS_PER_SOL
                )),
                _ => Some(format!("System {}", name)),
            }
        }
        TOKEN_PROGRAM_ID if !data.is_empty() => {
            let name = token_instruction_name(data[0])?;
            match (data[0], read_u64_le(data, 1)) {
                (3, Some(amount)) => Some(format!("Token {}: {} units", name, amount)),
                _ => Some(format!("Token {}", name)),
            }
        }
        _ => None,
    }
}

/// Describe an instruction in the context of its message
pub fn describe_compiled(message: &Message, ix: &CompiledInstruction) -> Option<String> {
    let program_id = message.program_id(ix)?;
    describe_instruction(program_id, &ix.data)
}
