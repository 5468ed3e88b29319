//! Fluent builder API for creating orchestrators.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use liraindex_core::{ContractKind, MemoryStore};
//! use liraindex_evm::{JsonRpcChainClient, OrchestratorBuilder};
//!
//! # fn main() -> Result<(), liraindex_core::IndexerError> {
//! let client = JsonRpcChainClient::new("https://sepolia.base.org", Duration::from_secs(30))?;
//! let orchestrator = OrchestratorBuilder::new()
//!     .chain_id("base-sepolia")
//!     .start_block(12_000_000)
//!     .batch_size(500)
//!     .contract(ContractKind::LiraToken, "0x1111111111111111111111111111111111111111", ["Transfer", "Approval"])
//!     .client(Arc::new(client))
//!     .store(Arc::new(MemoryStore::new()))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use liraindex_core::checkpoint::{CheckpointManager, CheckpointStore};
use liraindex_core::config::{ContractSettings, IndexerSettings};
use liraindex_core::error::IndexerError;
use liraindex_core::handler::EventRouter;
use liraindex_core::retry::RetryConfig;
use liraindex_core::store::ProjectionStore;
use liraindex_core::types::ContractKind;

use crate::client::ChainClient;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};

/// Fluent builder for [`Orchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    contracts: Vec<ContractSettings>,
    client: Option<Arc<dyn ChainClient>>,
    store: Option<Arc<dyn ProjectionStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    router: Option<EventRouter>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from loaded settings: network, contracts and runtime knobs.
    pub fn from_settings(settings: &IndexerSettings) -> Self {
        Self::new()
            .chain_id(settings.network.name.clone())
            .start_block(settings.network.start_block)
            .poll_interval(settings.poll_interval())
            .batch_size(settings.batch_size)
            .retry(settings.retry_config())
            .contracts(settings.contracts.clone())
    }

    /// Set the checkpoint namespace.
    pub fn chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.config.chain_id = chain_id.into();
        self
    }

    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the number of blocks per `eth_getLogs` query.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Track one contract.
    pub fn contract<I, S>(mut self, kind: ContractKind, address: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.contracts.push(ContractSettings {
            kind,
            address: Some(address.into()),
            events: events.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn contracts(mut self, contracts: Vec<ContractSettings>) -> Self {
        self.contracts = contracts;
        self
    }

    pub fn client(mut self, client: Arc<dyn ChainClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use one backend for both the read model and checkpoints.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: ProjectionStore + CheckpointStore + 'static,
    {
        self.store = Some(store.clone());
        self.checkpoints = Some(store);
        self
    }

    /// Keep checkpoints somewhere other than the read model.
    pub fn checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Replace the default router (one standard handler per family).
    pub fn router(mut self, router: EventRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn build(self) -> Result<Orchestrator, IndexerError> {
        let client = self
            .client
            .ok_or_else(|| IndexerError::Config("orchestrator needs a chain client".into()))?;
        let store = self
            .store
            .ok_or_else(|| IndexerError::Config("orchestrator needs a projection store".into()))?;
        let checkpoints = self
            .checkpoints
            .ok_or_else(|| IndexerError::Config("orchestrator needs a checkpoint store".into()))?;
        if self.config.batch_size == 0 {
            return Err(IndexerError::Config("batch size must be at least 1".into()));
        }
        if self.config.poll_interval.is_zero() {
            return Err(IndexerError::Config("poll interval must be greater than zero".into()));
        }

        let router = self.router.unwrap_or_else(|| EventRouter::new(store.clone()));
        let checkpoints = CheckpointManager::new(checkpoints, self.config.chain_id.clone());
        Ok(Orchestrator::new(self.config, self.contracts, client, store, checkpoints, router))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liraindex_core::memory::MemoryStore;
    use liraindex_core::IndexerState;

    use crate::client::JsonRpcChainClient;

    fn client() -> Arc<dyn ChainClient> {
        Arc::new(JsonRpcChainClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap())
    }

    #[test]
    fn builder_defaults() {
        let builder = OrchestratorBuilder::new();
        assert_eq!(builder.config.chain_id, "base-sepolia");
        assert_eq!(builder.config.batch_size, 1000);
        assert_eq!(builder.config.poll_interval, Duration::from_millis(5000));
        assert_eq!(builder.config.retry.attempts, 3);
    }

    #[test]
    fn from_settings_copies_knobs() {
        let vars = [("INDEXER_BATCH_SIZE", "50"), ("START_BLOCK_SEPOLIA", "77")];
        let settings = IndexerSettings::from_lookup(&|k| {
            vars.iter().find(|(key, _)| *key == k).map(|(_, v)| v.to_string())
        })
        .unwrap();
        let builder = OrchestratorBuilder::from_settings(&settings);
        assert_eq!(builder.config.batch_size, 50);
        assert_eq!(builder.config.start_block, 77);
        assert_eq!(builder.contracts.len(), 6);
    }

    #[tokio::test]
    async fn build_requires_client_and_store() {
        let err = OrchestratorBuilder::new().build().err().unwrap();
        assert!(matches!(err, IndexerError::Config(_)));

        let orchestrator = OrchestratorBuilder::new()
            .client(client())
            .store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap();
        assert_eq!(orchestrator.state(), IndexerState::Uninitialized);
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let err = OrchestratorBuilder::new()
            .client(client())
            .store(Arc::new(MemoryStore::new()))
            .batch_size(0)
            .build()
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn zero_poll_interval_is_rejected() {
        let err = OrchestratorBuilder::new()
            .client(client())
            .store(Arc::new(MemoryStore::new()))
            .poll_interval(Duration::ZERO)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, IndexerError::Config(_)));

        let vars = [("INDEXER_POLL_INTERVAL", "0")];
        let settings = IndexerSettings::from_lookup(&|k| {
            vars.iter().find(|(key, _)| *key == k).map(|(_, v)| v.to_string())
        })
        .unwrap();
        let err = OrchestratorBuilder::from_settings(&settings)
            .client(client())
            .store(Arc::new(MemoryStore::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }
}
