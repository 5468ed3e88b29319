//! Read-model entities projected from contract logs.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Token classification as emitted by the registry and factories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    Project,
    User,
    Social,
}

impl TokenType {
    /// Map the registry's `uint8 tokenType` code.
    pub fn from_code(code: u8) -> Result<Self, IndexerError> {
        match code {
            0 => Ok(Self::Project),
            1 => Ok(Self::User),
            2 => Ok(Self::Social),
            other => Err(IndexerError::Decode(format!("unknown token type code {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "PROJECT",
            Self::User => "USER",
            Self::Social => "SOCIAL",
        }
    }

    pub fn parse(s: &str) -> Result<Self, IndexerError> {
        match s {
            "PROJECT" => Ok(Self::Project),
            "USER" => Ok(Self::User),
            "SOCIAL" => Ok(Self::Social),
            other => Err(IndexerError::Storage(format!("bad token type '{other}'"))),
        }
    }
}

/// A token contract, keyed by lower-cased address. Deactivated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
    pub token_type: TokenType,
    pub creator_address: Option<String>,
    pub owner_address: Option<String>,
    pub registry_id: Option<U256>,
    pub is_active: bool,
    /// Unix seconds of the launch/creation log, if seen.
    pub launched_at: Option<i64>,
}

impl Token {
    pub const PLACEHOLDER_NAME: &'static str = "Unknown";
    pub const PLACEHOLDER_SYMBOL: &'static str = "UNK";
    pub const DEFAULT_DECIMALS: u8 = 18;

    /// A token first seen through the registry, before its metadata is known.
    pub fn placeholder(address: impl Into<String>, token_type: TokenType) -> Self {
        Self {
            address: address.into(),
            name: Self::PLACEHOLDER_NAME.into(),
            symbol: Self::PLACEHOLDER_SYMBOL.into(),
            decimals: Self::DEFAULT_DECIMALS,
            total_supply: U256::ZERO,
            token_type,
            creator_address: None,
            owner_address: None,
            registry_id: None,
            is_active: true,
            launched_at: None,
        }
    }
}

/// Aggregates for one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStat {
    pub token_address: String,
    pub holder_count: u64,
    pub transaction_count: u64,
    pub volume_total: U256,
}

impl TokenStat {
    pub fn empty(token_address: impl Into<String>) -> Self {
        Self {
            token_address: token_address.into(),
            holder_count: 0,
            transaction_count: 0,
            volume_total: U256::ZERO,
        }
    }

    pub fn apply(&mut self, delta: &StatDelta) {
        self.holder_count += delta.holders;
        self.transaction_count += delta.transactions;
        self.volume_total = self.volume_total.saturating_add(delta.volume);
    }
}

/// Increments applied to a [`TokenStat`] row in one store call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatDelta {
    pub holders: u64,
    pub transactions: u64,
    pub volume: U256,
}

/// A wallet, created lazily the first time any log references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub address: String,
    /// Globally unique when set.
    pub handle: Option<String>,
}

/// One-to-one with [`User`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: i64,
    pub metadata_uri: Option<String>,
    pub primary_token_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    Creator,
    Holder,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Holder => "holder",
        }
    }

    pub fn parse(s: &str) -> Result<Self, IndexerError> {
        match s {
            "creator" => Ok(Self::Creator),
            "holder" => Ok(Self::Holder),
            other => Err(IndexerError::Storage(format!("bad role '{other}'"))),
        }
    }
}

/// Unique on `(user_id, token_address, role)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTokenRole {
    pub user_id: i64,
    pub token_address: String,
    pub role: RoleKind,
    pub balance: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    Follow,
    Block,
    Mute,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::Block => "block",
            Self::Mute => "mute",
        }
    }

    pub fn parse(s: &str) -> Result<Self, IndexerError> {
        match s {
            "follow" => Ok(Self::Follow),
            "block" => Ok(Self::Block),
            "mute" => Ok(Self::Mute),
            other => Err(IndexerError::Storage(format!("bad edge type '{other}'"))),
        }
    }
}

/// A directed social relation, unique on `(follower_id, following_id, edge_type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocialEdge {
    pub follower_id: i64,
    pub following_id: i64,
    pub edge_type: EdgeType,
}

impl SocialEdge {
    pub fn new(follower_id: i64, following_id: i64, edge_type: EdgeType) -> Self {
        Self { follower_id, following_id, edge_type }
    }
}

/// Append-only audit row mirroring a token-related log.
///
/// `(tx_hash, log_index)` is unique across every insert path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    pub token_address: String,
    pub event_type: String,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub amount: Option<U256>,
    pub tx_hash: String,
    pub block_number: u64,
    pub block_timestamp: i64,
    pub log_index: u32,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_type_codes() {
        assert_eq!(TokenType::from_code(0).unwrap(), TokenType::Project);
        assert_eq!(TokenType::from_code(1).unwrap(), TokenType::User);
        assert_eq!(TokenType::from_code(2).unwrap(), TokenType::Social);
        assert!(TokenType::from_code(7).is_err());
        assert_eq!(TokenType::parse(TokenType::Social.as_str()).unwrap(), TokenType::Social);
    }

    #[test]
    fn stat_delta_accumulates() {
        let mut stat = TokenStat::empty("0xaa");
        stat.apply(&StatDelta { holders: 1, transactions: 1, volume: U256::from(10u64) });
        stat.apply(&StatDelta { holders: 0, transactions: 1, volume: U256::from(5u64) });
        assert_eq!(stat.holder_count, 1);
        assert_eq!(stat.transaction_count, 2);
        assert_eq!(stat.volume_total, U256::from(15u64));
    }

    #[test]
    fn placeholder_token() {
        let t = Token::placeholder("0xaa", TokenType::User);
        assert_eq!(t.name, "Unknown");
        assert_eq!(t.symbol, "UNK");
        assert_eq!(t.decimals, 18);
        assert!(t.is_active);
    }
}
