//! Process settings, loaded once at startup from the environment.
//!
//! Every value has a documented default. An unknown network or an
//! unparsable number is a [`IndexerError::Config`] and stops the process.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::retry::RetryConfig;
use crate::types::ContractKind;

/// Chain endpoint and start block for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Slug such as `"base-sepolia"`.
    pub name: String,
    pub rpc_url: String,
    /// Enables push subscriptions when set.
    #[serde(default)]
    pub ws_url: Option<String>,
    pub chain_id: u64,
    #[serde(default)]
    pub start_block: u64,
}

/// One tracked contract. Contracts without an address are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSettings {
    pub kind: ContractKind,
    #[serde(default)]
    pub address: Option<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerSettings {
    pub network: NetworkSettings,
    pub contracts: Vec<ContractSettings>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Blocks per log query.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_batch_size() -> u64 {
    1000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".into()
}

fn default_database_url() -> String {
    "sqlite:./liraindex.db".into()
}

pub const DEFAULT_NETWORK: &str = "base-sepolia";

/// Built-in network table. Returns `None` for an unknown name.
pub fn network(name: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Option<NetworkSettings>, IndexerError> {
    let (rpc_var, default_rpc, ws_var, chain_id, start_var) = match name {
        "base-sepolia" => (
            "BASE_SEPOLIA_RPC",
            "https://sepolia.base.org",
            "BASE_SEPOLIA_WS",
            84532,
            "START_BLOCK_SEPOLIA",
        ),
        "base-mainnet" => (
            "BASE_MAINNET_RPC",
            "https://mainnet.base.org",
            "BASE_MAINNET_WS",
            8453,
            "START_BLOCK_MAINNET",
        ),
        _ => return Ok(None),
    };
    Ok(Some(NetworkSettings {
        name: name.to_string(),
        rpc_url: lookup(rpc_var).unwrap_or_else(|| default_rpc.to_string()),
        ws_url: lookup(ws_var).filter(|s| !s.is_empty()),
        chain_id,
        start_block: parse_var(lookup, start_var, 0)?,
    }))
}

/// Events each contract emits, as deployed. Some have no handler.
pub fn default_events(kind: ContractKind) -> Vec<String> {
    let names: &[&str] = match kind {
        ContractKind::LiraToken => &["Transfer", "Approval", "TreasuryUpdated", "ProtocolFeeUpdated"],
        ContractKind::LiraTokenRegistry => &[
            "TokenRegistered",
            "TokenUpdated",
            "TokenRemoved",
            "DAOOperatorSet",
            "TokenFactoryUpdated",
        ],
        ContractKind::TokenLaunchFactory => &["TokenLaunched"],
        ContractKind::LiraUserTokenFactory => {
            &["ReputationTokenCreated", "SocialTokenCreated", "AccessTokenCreated"]
        }
        ContractKind::LiraProfile => {
            &["ProfileCreated", "ProfileUpdated", "HandleUpdated", "PrimaryTokenLinked"]
        }
        ContractKind::LiraSocialGraph => {
            &["Followed", "Unfollowed", "Blocked", "Unblocked", "Muted", "Unmuted"]
        }
    };
    names.iter().map(|s| s.to_string()).collect()
}

fn address_var(kind: ContractKind) -> &'static str {
    match kind {
        ContractKind::LiraToken => "NEXT_PUBLIC_LIRA_TOKEN",
        ContractKind::LiraTokenRegistry => "NEXT_PUBLIC_LIRA_REGISTRY",
        ContractKind::TokenLaunchFactory => "NEXT_PUBLIC_FACTORY",
        ContractKind::LiraUserTokenFactory => "NEXT_PUBLIC_USER_TOKEN_FACTORY",
        ContractKind::LiraProfile => "NEXT_PUBLIC_LIRA_PROFILE",
        ContractKind::LiraSocialGraph => "NEXT_PUBLIC_LIRA_SOCIAL_GRAPH",
    }
}

fn parse_var<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, IndexerError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| IndexerError::Config(format!("{key}={raw:?}: {e}"))),
    }
}

impl IndexerSettings {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, IndexerError> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key/value lookup.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, IndexerError> {
        let network_name = lookup("INDEXER_NETWORK").unwrap_or_else(|| DEFAULT_NETWORK.to_string());
        let network = network(&network_name, lookup)?
            .ok_or_else(|| IndexerError::Config(format!("unknown network '{network_name}'")))?;

        let contracts = ContractKind::ALL
            .into_iter()
            .map(|kind| ContractSettings {
                kind,
                address: lookup(address_var(kind)).filter(|a| !a.trim().is_empty()),
                events: default_events(kind),
            })
            .collect();

        Ok(Self {
            network,
            contracts,
            poll_interval_ms: parse_var(lookup, "INDEXER_POLL_INTERVAL", default_poll_interval_ms())?,
            batch_size: parse_var(lookup, "INDEXER_BATCH_SIZE", default_batch_size())?,
            retry_attempts: parse_var(lookup, "INDEXER_RETRY_ATTEMPTS", default_retry_attempts())?,
            retry_delay_ms: parse_var(lookup, "INDEXER_RETRY_DELAY", default_retry_delay_ms())?,
            log_level: lookup("INDEXER_LOG_LEVEL").unwrap_or_else(default_log_level),
            log_json: parse_var(lookup, "INDEXER_LOG_JSON", false)?,
            database_url: lookup("DATABASE_URL").unwrap_or_else(default_database_url),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            backoff: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn load(vars: &HashMap<String, String>) -> Result<IndexerSettings, IndexerError> {
        IndexerSettings::from_lookup(&|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let settings = load(&env(&[])).unwrap();
        assert_eq!(settings.network.name, "base-sepolia");
        assert_eq!(settings.network.chain_id, 84532);
        assert_eq!(settings.network.rpc_url, "https://sepolia.base.org");
        assert_eq!(settings.poll_interval_ms, 5000);
        assert_eq!(settings.batch_size, 1000);
        assert_eq!(settings.retry_attempts, 3);
        assert_eq!(settings.retry_delay_ms, 1000);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.contracts.len(), 6);
        assert!(settings.contracts.iter().all(|c| c.address.is_none()));
    }

    #[test]
    fn overrides() {
        let vars = env(&[
            ("INDEXER_NETWORK", "base-mainnet"),
            ("BASE_MAINNET_WS", "wss://node.example"),
            ("START_BLOCK_MAINNET", "123"),
            ("NEXT_PUBLIC_LIRA_TOKEN", "0xAA"),
            ("INDEXER_POLL_INTERVAL", "250"),
        ]);
        let settings = load(&vars).unwrap();
        assert_eq!(settings.network.chain_id, 8453);
        assert_eq!(settings.network.ws_url.as_deref(), Some("wss://node.example"));
        assert_eq!(settings.network.start_block, 123);
        assert_eq!(settings.poll_interval(), Duration::from_millis(250));

        let token = settings.contracts.iter().find(|c| c.kind == ContractKind::LiraToken).unwrap();
        assert_eq!(token.address.as_deref(), Some("0xAA"));
        assert!(token.events.contains(&"TreasuryUpdated".to_string()));
    }

    #[test]
    fn unknown_network_is_fatal() {
        let err = load(&env(&[("INDEXER_NETWORK", "goerli")])).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn bad_number_is_config_error() {
        let err = load(&env(&[("INDEXER_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
    }
}
