use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{audit_row, ensure_creator};
use crate::entities::{Token, TokenType};
use crate::error::IndexerError;
use crate::handler::EventHandler;
use crate::store::ProjectionStore;
use crate::types::{EventKind, RawLogEvent};

/// `TokenRegistered`, `TokenUpdated` and `TokenRemoved` from the token registry.
pub struct RegistryHandler {
    store: Arc<dyn ProjectionStore>,
}

impl RegistryHandler {
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    async fn load_or_placeholder(
        &self,
        address: &str,
        token_type: TokenType,
    ) -> Result<Token, IndexerError> {
        Ok(self
            .store
            .token(address)
            .await?
            .unwrap_or_else(|| Token::placeholder(address, token_type)))
    }

    async fn registered(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let token_address = log.args.address("tokenAddress")?;
        let owner = log.args.address("owner")?;
        let token_type = TokenType::from_code(log.args.uint_u8("tokenType")?)?;
        let registry_id = log.args.uint("registryId")?;

        let mut row = audit_row(log, &token_address);
        row.to_address = Some(owner.clone());
        row.metadata = json!({
            "tokenType": token_type.as_str(),
            "registryId": registry_id.to_string(),
        });
        if !self.store.insert_token_event(&row).await? {
            return Ok(());
        }

        let mut token = self.load_or_placeholder(&token_address, token_type).await?;
        token.token_type = token_type;
        token.owner_address = Some(owner.clone());
        token.creator_address.get_or_insert_with(|| owner.clone());
        token.registry_id = Some(registry_id);
        token.is_active = true;
        self.store.save_token(&token).await?;

        ensure_creator(self.store.as_ref(), &owner, &token_address, None).await?;

        tracing::info!(
            token = %token_address,
            owner = %owner,
            token_type = token_type.as_str(),
            registry_id = %registry_id,
            "TokenRegistered indexed"
        );
        Ok(())
    }

    async fn updated(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let token_address = log.args.address("tokenAddress")?;
        let owner = log.args.address("owner")?;
        let token_type = TokenType::from_code(log.args.uint_u8("tokenType")?)?;

        let mut row = audit_row(log, &token_address);
        row.to_address = Some(owner.clone());
        row.metadata = json!({ "tokenType": token_type.as_str() });
        if !self.store.insert_token_event(&row).await? {
            return Ok(());
        }

        let mut token = self.load_or_placeholder(&token_address, token_type).await?;
        token.token_type = token_type;
        token.owner_address = Some(owner);
        self.store.save_token(&token).await
    }

    async fn removed(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let token_address = log.args.address("tokenAddress")?;

        if !self.store.insert_token_event(&audit_row(log, &token_address)).await? {
            return Ok(());
        }

        let mut token = self.load_or_placeholder(&token_address, TokenType::Project).await?;
        token.is_active = false;
        self.store.save_token(&token).await?;

        tracing::info!(token = %token_address, "TokenRemoved indexed, token deactivated");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for RegistryHandler {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn apply(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        match log.event {
            EventKind::TokenRegistered => self.registered(log).await,
            EventKind::TokenUpdated => self.updated(log).await,
            EventKind::TokenRemoved => self.removed(log).await,
            other => Err(IndexerError::Other(format!("registry handler cannot apply {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::RoleKind;
    use crate::handlers::test_support::*;
    use crate::memory::MemoryStore;
    use crate::types::EventArgs;
    use alloy_primitives::U256;

    fn registered(token: &str, owner: &str, code: u64, tx: &str) -> RawLogEvent {
        let args = EventArgs::new()
            .with("tokenAddress", address(token))
            .with("owner", address(owner))
            .with("tokenType", uint(code))
            .with("registryId", uint(9));
        log(&addr(0xee), EventKind::TokenRegistered, args, tx, 50, 0)
    }

    #[tokio::test]
    async fn registration_creates_placeholder_and_creator() {
        let store = Arc::new(MemoryStore::new());
        let handler = RegistryHandler::new(store.clone());

        handler.apply(&registered(&addr(0xaa), &addr(0xbb), 2, "0xr1")).await.unwrap();

        let token = store.token(&addr(0xaa)).await.unwrap().unwrap();
        assert_eq!(token.name, "Unknown");
        assert_eq!(token.symbol, "UNK");
        assert_eq!(token.token_type, TokenType::Social);
        assert_eq!(token.owner_address.as_deref(), Some(addr(0xbb).as_str()));
        assert_eq!(token.registry_id, Some(U256::from(9u64)));

        let owner = store.user(&addr(0xbb)).await.unwrap().unwrap();
        let role = store.role(owner.id, &addr(0xaa), RoleKind::Creator).await.unwrap();
        assert!(role.is_some());

        let events = store.token_events(&addr(0xaa)).await.unwrap();
        assert_eq!(events[0].metadata["tokenType"], "SOCIAL");
    }

    #[tokio::test]
    async fn registration_keeps_known_metadata() {
        let store = Arc::new(MemoryStore::new());
        let mut launched = Token::placeholder(addr(0xaa), TokenType::Project);
        launched.name = "Foo".into();
        launched.symbol = "FOO".into();
        store.save_token(&launched).await.unwrap();

        let handler = RegistryHandler::new(store.clone());
        handler.apply(&registered(&addr(0xaa), &addr(0xbb), 1, "0xr1")).await.unwrap();

        let token = store.token(&addr(0xaa)).await.unwrap().unwrap();
        assert_eq!(token.name, "Foo");
        assert_eq!(token.token_type, TokenType::User);
    }

    #[tokio::test]
    async fn redelivered_registration_writes_one_audit_row() {
        let store = Arc::new(MemoryStore::new());
        let handler = RegistryHandler::new(store.clone());
        let ev = registered(&addr(0xaa), &addr(0xbb), 0, "0xr1");

        handler.apply(&ev).await.unwrap();
        handler.apply(&ev).await.unwrap();

        assert_eq!(store.token_events(&addr(0xaa)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removal_deactivates() {
        let store = Arc::new(MemoryStore::new());
        let handler = RegistryHandler::new(store.clone());
        handler.apply(&registered(&addr(0xaa), &addr(0xbb), 0, "0xr1")).await.unwrap();

        let args = EventArgs::new().with("tokenAddress", address(&addr(0xaa)));
        let removal = log(&addr(0xee), EventKind::TokenRemoved, args, "0xr2", 60, 0);
        handler.apply(&removal).await.unwrap();

        let token = store.token(&addr(0xaa)).await.unwrap().unwrap();
        assert!(!token.is_active);
        assert_eq!(store.token_events(&addr(0xaa)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_changes_owner_and_type() {
        let store = Arc::new(MemoryStore::new());
        let handler = RegistryHandler::new(store.clone());
        handler.apply(&registered(&addr(0xaa), &addr(0xbb), 0, "0xr1")).await.unwrap();

        let args = EventArgs::new()
            .with("tokenAddress", address(&addr(0xaa)))
            .with("owner", address(&addr(0xcc)))
            .with("tokenType", uint(1));
        handler
            .apply(&log(&addr(0xee), EventKind::TokenUpdated, args, "0xr3", 61, 0))
            .await
            .unwrap();

        let token = store.token(&addr(0xaa)).await.unwrap().unwrap();
        assert_eq!(token.owner_address.as_deref(), Some(addr(0xcc).as_str()));
        assert_eq!(token.creator_address.as_deref(), Some(addr(0xbb).as_str()));
        assert_eq!(token.token_type, TokenType::User);
    }
}
