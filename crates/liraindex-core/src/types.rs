//! Shared types: contract and event kinds, decoded log arguments, raw logs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// The zero address, used as `from` on mints and `to` on burns.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Lower-case an address for use as an entity key.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Returns `true` for the zero address in any casing.
pub fn is_zero_address(address: &str) -> bool {
    normalize_address(address) == ZERO_ADDRESS
}

// ─── Contract kinds ───────────────────────────────────────────────────────────

/// The LIRA contracts the indexer knows how to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContractKind {
    LiraToken,
    LiraTokenRegistry,
    TokenLaunchFactory,
    LiraUserTokenFactory,
    LiraProfile,
    LiraSocialGraph,
}

impl ContractKind {
    pub const ALL: [ContractKind; 6] = [
        Self::LiraToken,
        Self::LiraTokenRegistry,
        Self::TokenLaunchFactory,
        Self::LiraUserTokenFactory,
        Self::LiraProfile,
        Self::LiraSocialGraph,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::LiraToken => "LiraToken",
            Self::LiraTokenRegistry => "LiraTokenRegistry",
            Self::TokenLaunchFactory => "TokenLaunchFactory",
            Self::LiraUserTokenFactory => "LiraUserTokenFactory",
            Self::LiraProfile => "LiraProfile",
            Self::LiraSocialGraph => "LiraSocialGraph",
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ContractKind {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| IndexerError::Config(format!("unknown contract '{s}'")))
    }
}

// ─── Event kinds ──────────────────────────────────────────────────────────────

/// Every contract event that has a projection handler.
///
/// Configured event names outside this set (e.g. `TreasuryUpdated`) are
/// reported at startup and never tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Transfer,
    Approval,
    TokenRegistered,
    TokenUpdated,
    TokenRemoved,
    ProfileCreated,
    ProfileUpdated,
    HandleUpdated,
    PrimaryTokenLinked,
    Followed,
    Unfollowed,
    Blocked,
    Unblocked,
    Muted,
    Unmuted,
    TokenLaunched,
    ReputationTokenCreated,
    SocialTokenCreated,
    AccessTokenCreated,
}

impl EventKind {
    pub const ALL: [EventKind; 19] = [
        Self::Transfer,
        Self::Approval,
        Self::TokenRegistered,
        Self::TokenUpdated,
        Self::TokenRemoved,
        Self::ProfileCreated,
        Self::ProfileUpdated,
        Self::HandleUpdated,
        Self::PrimaryTokenLinked,
        Self::Followed,
        Self::Unfollowed,
        Self::Blocked,
        Self::Unblocked,
        Self::Muted,
        Self::Unmuted,
        Self::TokenLaunched,
        Self::ReputationTokenCreated,
        Self::SocialTokenCreated,
        Self::AccessTokenCreated,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Transfer => "Transfer",
            Self::Approval => "Approval",
            Self::TokenRegistered => "TokenRegistered",
            Self::TokenUpdated => "TokenUpdated",
            Self::TokenRemoved => "TokenRemoved",
            Self::ProfileCreated => "ProfileCreated",
            Self::ProfileUpdated => "ProfileUpdated",
            Self::HandleUpdated => "HandleUpdated",
            Self::PrimaryTokenLinked => "PrimaryTokenLinked",
            Self::Followed => "Followed",
            Self::Unfollowed => "Unfollowed",
            Self::Blocked => "Blocked",
            Self::Unblocked => "Unblocked",
            Self::Muted => "Muted",
            Self::Unmuted => "Unmuted",
            Self::TokenLaunched => "TokenLaunched",
            Self::ReputationTokenCreated => "ReputationTokenCreated",
            Self::SocialTokenCreated => "SocialTokenCreated",
            Self::AccessTokenCreated => "AccessTokenCreated",
        }
    }

    /// Look up an event by its Solidity name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A resolved contract: kind, lower-cased address, and the routed events to track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractBinding {
    pub kind: ContractKind,
    pub address: String,
    pub events: Vec<EventKind>,
}

// ─── Decoded arguments ────────────────────────────────────────────────────────

/// A decoded ABI argument value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbiValue {
    Address(String),
    Uint(U256),
    Bool(bool),
    String(String),
}

/// Named event arguments, as decoded from topics + data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventArgs(BTreeMap<String, AbiValue>);

impl EventArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: AbiValue) {
        self.0.insert(name.into(), value);
    }

    /// Builder-style insert, handy when assembling logs by hand.
    pub fn with(mut self, name: impl Into<String>, value: AbiValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AbiValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A required address argument, lower-cased.
    pub fn address(&self, name: &str) -> Result<String, IndexerError> {
        match self.get(name) {
            Some(AbiValue::Address(a)) => Ok(normalize_address(a)),
            other => Err(mismatch(name, "address", other)),
        }
    }

    pub fn uint(&self, name: &str) -> Result<U256, IndexerError> {
        match self.get(name) {
            Some(AbiValue::Uint(v)) => Ok(*v),
            other => Err(mismatch(name, "uint", other)),
        }
    }

    /// A small unsigned argument (e.g. a `uint8` enum code).
    pub fn uint_u8(&self, name: &str) -> Result<u8, IndexerError> {
        let v = self.uint(name)?;
        u8::try_from(v).map_err(|_| IndexerError::Decode(format!("argument '{name}' out of range: {v}")))
    }

    pub fn string(&self, name: &str) -> Result<String, IndexerError> {
        match self.get(name) {
            Some(AbiValue::String(s)) => Ok(s.clone()),
            other => Err(mismatch(name, "string", other)),
        }
    }
}

fn mismatch(name: &str, expected: &str, found: Option<&AbiValue>) -> IndexerError {
    match found {
        None => IndexerError::Decode(format!("missing argument '{name}'")),
        Some(v) => IndexerError::Decode(format!("argument '{name}' is not {expected}: {v:?}")),
    }
}

// ─── Raw log ──────────────────────────────────────────────────────────────────

/// A decoded log as delivered by the chain client. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogEvent {
    pub contract_address: String,
    pub event: EventKind,
    pub args: EventArgs,
    pub tx_hash: String,
    pub block_number: u64,
    /// Unix seconds; 0 when the node did not supply one.
    pub block_timestamp: i64,
    pub log_index: u32,
}

impl RawLogEvent {
    /// Chain order within a contract.
    pub fn order_key(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }

    /// The key that identifies a log uniquely on chain.
    pub fn dedup_key(&self) -> (&str, u32) {
        (&self.tx_hash, self.log_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_kind_parse() {
        assert_eq!("LiraSocialGraph".parse::<ContractKind>().unwrap(), ContractKind::LiraSocialGraph);
        assert!("Treasury".parse::<ContractKind>().is_err());
    }

    #[test]
    fn event_kind_names_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(EventKind::from_name("TreasuryUpdated"), None);
    }

    #[test]
    fn args_accessors() {
        let args = EventArgs::new()
            .with("to", AbiValue::Address("0xAbCd000000000000000000000000000000000001".into()))
            .with("value", AbiValue::Uint(U256::from(500u64)))
            .with("tokenType", AbiValue::Uint(U256::from(2u64)))
            .with("handle", AbiValue::String("alice".into()));

        assert_eq!(args.address("to").unwrap(), "0xabcd000000000000000000000000000000000001");
        assert_eq!(args.uint("value").unwrap(), U256::from(500u64));
        assert_eq!(args.uint_u8("tokenType").unwrap(), 2);
        assert_eq!(args.string("handle").unwrap(), "alice");
    }

    #[test]
    fn args_missing_and_mismatched() {
        let args = EventArgs::new().with("value", AbiValue::Uint(U256::from(1u64)));
        let missing = args.address("to").unwrap_err().to_string();
        assert!(missing.contains("missing argument 'to'"));
        assert!(args.string("value").is_err());

        let big = EventArgs::new().with("code", AbiValue::Uint(U256::from(300u64)));
        assert!(big.uint_u8("code").is_err());
    }

    #[test]
    fn zero_address_detection() {
        assert!(is_zero_address(ZERO_ADDRESS));
        assert!(!is_zero_address("0x00000000000000000000000000000000000000cc"));
    }
}
