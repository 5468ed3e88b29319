use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::Profile;
use crate::error::IndexerError;
use crate::handler::EventHandler;
use crate::store::ProjectionStore;
use crate::types::{EventKind, RawLogEvent};

/// Profile lifecycle events from `LiraProfile`.
pub struct ProfileHandler {
    store: Arc<dyn ProjectionStore>,
}

impl ProfileHandler {
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    async fn upsert_profile(
        &self,
        user_id: i64,
        update: impl FnOnce(&mut Profile),
    ) -> Result<(), IndexerError> {
        let mut profile = self.store.profile(user_id).await?.unwrap_or(Profile {
            user_id,
            metadata_uri: None,
            primary_token_address: None,
        });
        update(&mut profile);
        self.store.save_profile(&profile).await
    }

    async fn created(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let address = log.args.address("userAddress")?;
        let handle = log.args.string("handle")?;
        let metadata_uri = non_empty(log.args.string("metadataURI")?);

        let user = self.store.ensure_user(&address).await?;
        self.store.set_handle(user.id, &handle).await?;
        self.upsert_profile(user.id, |p| p.metadata_uri = metadata_uri).await?;

        tracing::info!(user = %address, handle = %handle, "ProfileCreated indexed");
        Ok(())
    }

    async fn updated(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let address = log.args.address("userAddress")?;
        let metadata_uri = non_empty(log.args.string("metadataURI")?);

        let user = self.store.ensure_user(&address).await?;
        self.upsert_profile(user.id, |p| p.metadata_uri = metadata_uri).await
    }

    async fn handle_updated(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let address = log.args.address("userAddress")?;
        let new_handle = log.args.string("newHandle")?;

        let user = self.store.ensure_user(&address).await?;
        self.store.set_handle(user.id, &new_handle).await?;

        tracing::info!(
            user = %address,
            old = ?log.args.string("oldHandle").ok(),
            new = %new_handle,
            "HandleUpdated indexed"
        );
        Ok(())
    }

    async fn primary_token_linked(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let address = log.args.address("userAddress")?;
        let token_address = log.args.address("tokenAddress")?;

        let Some(user) = self.store.user(&address).await? else {
            tracing::warn!(user = %address, token = %token_address, "PrimaryTokenLinked for unknown user, ignoring");
            return Ok(());
        };
        self.upsert_profile(user.id, |p| p.primary_token_address = Some(token_address))
            .await
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[async_trait]
impl EventHandler for ProfileHandler {
    fn name(&self) -> &'static str {
        "profile"
    }

    async fn apply(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        match log.event {
            EventKind::ProfileCreated => self.created(log).await,
            EventKind::ProfileUpdated => self.updated(log).await,
            EventKind::HandleUpdated => self.handle_updated(log).await,
            EventKind::PrimaryTokenLinked => self.primary_token_linked(log).await,
            other => Err(IndexerError::Other(format!("profile handler cannot apply {other}"))),
        }
    }
}
