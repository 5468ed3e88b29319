use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use serde_json::json;

use super::{audit_row, ensure_creator};
use crate::entities::{Token, TokenType};
use crate::error::IndexerError;
use crate::handler::EventHandler;
use crate::store::ProjectionStore;
use crate::types::{EventKind, RawLogEvent};

/// Token creation events from `TokenLaunchFactory` and `LiraUserTokenFactory`.
pub struct FactoryHandler {
    store: Arc<dyn ProjectionStore>,
}

struct Launch {
    token_address: String,
    creator: String,
    name: String,
    symbol: String,
    token_type: TokenType,
    /// Only `TokenLaunched` carries a supply.
    total_supply: Option<U256>,
}

impl FactoryHandler {
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    fn decode(log: &RawLogEvent) -> Result<Launch, IndexerError> {
        let token_type = match log.event {
            EventKind::TokenLaunched => TokenType::Project,
            EventKind::ReputationTokenCreated | EventKind::AccessTokenCreated => TokenType::User,
            EventKind::SocialTokenCreated => TokenType::Social,
            other => {
                return Err(IndexerError::Other(format!("factory handler cannot apply {other}")))
            }
        };
        let total_supply = match log.event {
            EventKind::TokenLaunched => Some(log.args.uint("totalSupply")?),
            _ => None,
        };
        Ok(Launch {
            token_address: log.args.address("tokenAddress")?,
            creator: log.args.address("creator")?,
            name: log.args.string("name")?,
            symbol: log.args.string("symbol")?,
            token_type,
            total_supply,
        })
    }
}

#[async_trait]
impl EventHandler for FactoryHandler {
    fn name(&self) -> &'static str {
        "factory"
    }

    async fn apply(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let launch = Self::decode(log)?;

        let mut row = audit_row(log, &launch.token_address);
        row.to_address = Some(launch.creator.clone());
        row.amount = launch.total_supply;
        row.metadata = json!({ "name": launch.name, "symbol": launch.symbol });
        if !self.store.insert_token_event(&row).await? {
            tracing::debug!(tx_hash = %log.tx_hash, log_index = log.log_index, "duplicate {}, skipping", log.event);
            return Ok(());
        }

        let mut token = match self.store.token(&launch.token_address).await? {
            Some(existing) => existing,
            None => {
                let mut t = Token::placeholder(launch.token_address.clone(), launch.token_type);
                t.creator_address = Some(launch.creator.clone());
                t.owner_address = Some(launch.creator.clone());
                t
            }
        };
        token.name = launch.name.clone();
        token.symbol = launch.symbol.clone();
        token.token_type = launch.token_type;
        token.launched_at = Some(log.block_timestamp);
        if let Some(supply) = launch.total_supply {
            token.total_supply = supply;
        }
        self.store.save_token(&token).await?;

        if log.event == EventKind::TokenLaunched {
            self.store.create_token_stat(&launch.token_address, 1).await?;
        }
        ensure_creator(
            self.store.as_ref(),
            &launch.creator,
            &launch.token_address,
            launch.total_supply,
        )
        .await?;

        tracing::info!(
            event = %log.event,
            token = %launch.token_address,
            creator = %launch.creator,
            name = %launch.name,
            symbol = %launch.symbol,
            "token creation indexed"
        );
        Ok(())
    }
}
