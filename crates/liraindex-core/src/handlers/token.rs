use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;

use super::audit_row;
use crate::entities::{RoleKind, StatDelta, UserTokenRole};
use crate::error::IndexerError;
use crate::handler::EventHandler;
use crate::store::ProjectionStore;
use crate::types::{is_zero_address, normalize_address, EventKind, RawLogEvent};

/// `Transfer` and `Approval` on the LIRA token itself.
pub struct TokenHandler {
    store: Arc<dyn ProjectionStore>,
}

enum Balance {
    Credit(U256),
    Debit(U256),
}

impl TokenHandler {
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    async fn transfer(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let from = log.args.address("from")?;
        let to = log.args.address("to")?;
        let value = log.args.uint("value")?;
        let token = normalize_address(&log.contract_address);

        let mut row = audit_row(log, &token);
        row.from_address = Some(from.clone());
        row.to_address = Some(to.clone());
        row.amount = Some(value);
        if !self.store.insert_token_event(&row).await? {
            tracing::debug!(tx_hash = %log.tx_hash, log_index = log.log_index, "duplicate Transfer, skipping");
            return Ok(());
        }

        let mut new_holders = 0;
        if !is_zero_address(&to) && self.adjust_holder(&to, &token, Balance::Credit(value)).await? {
            new_holders += 1;
        }
        if !is_zero_address(&from) && self.adjust_holder(&from, &token, Balance::Debit(value)).await? {
            new_holders += 1;
        }

        self.store
            .record_activity(
                &token,
                StatDelta { holders: new_holders, transactions: 1, volume: value },
            )
            .await?;

        tracing::info!(token = %token, from = %from, to = %to, value = %value, "Transfer indexed");
        Ok(())
    }

    async fn approval(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let owner = log.args.address("owner")?;
        let spender = log.args.address("spender")?;
        let value = log.args.uint("value")?;
        let token = normalize_address(&log.contract_address);

        let mut row = audit_row(log, &token);
        row.from_address = Some(owner);
        row.to_address = Some(spender);
        row.amount = Some(value);
        if !self.store.insert_token_event(&row).await? {
            tracing::debug!(tx_hash = %log.tx_hash, log_index = log.log_index, "duplicate Approval, skipping");
            return Ok(());
        }

        self.store
            .record_activity(&token, StatDelta { transactions: 1, ..Default::default() })
            .await
    }

    /// Returns `true` if the holder role was created by this call.
    async fn adjust_holder(
        &self,
        address: &str,
        token: &str,
        change: Balance,
    ) -> Result<bool, IndexerError> {
        let user = self.store.ensure_user(address).await?;
        let existing = self.store.role(user.id, token, RoleKind::Holder).await?;
        let created = existing.is_none();
        let mut role = existing.unwrap_or(UserTokenRole {
            user_id: user.id,
            token_address: token.to_string(),
            role: RoleKind::Holder,
            balance: U256::ZERO,
        });
        role.balance = match change {
            Balance::Credit(v) => role.balance.saturating_add(v),
            Balance::Debit(v) => role.balance.saturating_sub(v),
        };
        self.store.save_role(&role).await?;
        Ok(created)
    }
}

#[async_trait]
impl EventHandler for TokenHandler {
    fn name(&self) -> &'static str {
        "token"
    }

    async fn apply(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        match log.event {
            EventKind::Transfer => self.transfer(log).await,
            EventKind::Approval => self.approval(log).await,
            other => Err(IndexerError::Other(format!("token handler cannot apply {other}"))),
        }
    }
}
