//! Handler families. Each one turns a decoded log into store writes and
//! performs no network I/O.

mod factory;
mod profile;
mod registry;
mod social;
mod token;

pub use factory::FactoryHandler;
pub use profile::ProfileHandler;
pub use registry::RegistryHandler;
pub use social::SocialHandler;
pub use token::TokenHandler;

use alloy_primitives::U256;

use crate::entities::{RoleKind, TokenEvent, UserTokenRole};
use crate::error::IndexerError;
use crate::store::ProjectionStore;
use crate::types::RawLogEvent;

/// Audit row for `log` against `token_address`, with no addresses or amount filled in.
pub(crate) fn audit_row(log: &RawLogEvent, token_address: &str) -> TokenEvent {
    TokenEvent {
        token_address: token_address.to_string(),
        event_type: log.event.name().to_string(),
        from_address: None,
        to_address: None,
        amount: None,
        tx_hash: log.tx_hash.clone(),
        block_number: log.block_number,
        block_timestamp: log.block_timestamp,
        log_index: log.log_index,
        metadata: serde_json::Value::Null,
    }
}

/// Make sure `address` has a creator role on `token_address`.
///
/// `balance` overwrites an existing role's balance when given.
pub(crate) async fn ensure_creator(
    store: &dyn ProjectionStore,
    address: &str,
    token_address: &str,
    balance: Option<U256>,
) -> Result<(), IndexerError> {
    let user = store.ensure_user(address).await?;
    let role = match store.role(user.id, token_address, RoleKind::Creator).await? {
        Some(mut existing) => match balance {
            Some(b) => {
                existing.balance = b;
                existing
            }
            None => return Ok(()),
        },
        None => UserTokenRole {
            user_id: user.id,
            token_address: token_address.to_string(),
            role: RoleKind::Creator,
            balance: balance.unwrap_or(U256::ZERO),
        },
    };
    store.save_role(&role).await
}
