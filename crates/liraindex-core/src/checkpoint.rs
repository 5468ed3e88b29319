//! Checkpoints: the last block whose logs have been fully applied, per contract.
//!
//! A checkpoint only ever moves forward. On startup it is resolved as the
//! maximum of the persisted value, the newest stored event for the contract
//! address, and the configured start block.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::ContractKind;

/// A persisted checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Network slug (e.g. `"base-sepolia"`).
    pub chain_id: String,
    /// Contract name (e.g. `"LiraToken"`).
    pub contract: String,
    /// Last fully applied block.
    pub block_number: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Trait for storing and loading checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, chain_id: &str, contract: &str)
        -> Result<Option<Checkpoint>, IndexerError>;

    /// Upsert a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError>;
}

/// Inputs for resolving a contract's starting position.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointSeed {
    /// Newest block of any stored event for the contract address.
    pub latest_event_block: Option<u64>,
    /// Configured network start block.
    pub start_block: u64,
}

/// Owns the in-memory checkpoint map and writes through to a [`CheckpointStore`].
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    chain_id: String,
    positions: Mutex<HashMap<ContractKind, u64>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, chain_id: impl Into<String>) -> Self {
        Self {
            store,
            chain_id: chain_id.into(),
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve and cache the starting checkpoint for `contract`.
    pub async fn load(
        &self,
        contract: ContractKind,
        seed: CheckpointSeed,
    ) -> Result<u64, IndexerError> {
        let persisted = self
            .store
            .load(&self.chain_id, contract.name())
            .await?
            .map(|cp| cp.block_number);

        let resolved = [persisted, seed.latest_event_block, Some(seed.start_block)]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(0);

        self.set(contract, resolved);
        if persisted != Some(resolved) {
            self.persist(contract, resolved).await?;
        }

        tracing::info!(
            contract = %contract,
            checkpoint = resolved,
            persisted = ?persisted,
            latest_event = ?seed.latest_event_block,
            "checkpoint loaded"
        );
        Ok(resolved)
    }

    /// Current in-memory checkpoint, if the contract has been loaded.
    pub fn get(&self, contract: ContractKind) -> Option<u64> {
        self.positions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&contract)
            .copied()
    }

    /// Move the checkpoint forward to `block`. Lower values are ignored.
    ///
    /// Returns the checkpoint after the call.
    pub async fn advance(&self, contract: ContractKind, block: u64) -> Result<u64, IndexerError> {
        let current = self.get(contract).unwrap_or(0);
        if block <= current {
            return Ok(current);
        }
        self.persist(contract, block).await?;
        self.set(contract, block);
        tracing::debug!(contract = %contract, checkpoint = block, "checkpoint advanced");
        Ok(block)
    }

    fn set(&self, contract: ContractKind, block: u64) {
        let mut positions = self.positions.lock().unwrap_or_else(|p| p.into_inner());
        let entry = positions.entry(contract).or_insert(block);
        *entry = (*entry).max(block);
    }

    async fn persist(&self, contract: ContractKind, block: u64) -> Result<(), IndexerError> {
        self.store
            .save(Checkpoint {
                chain_id: self.chain_id.clone(),
                contract: contract.name().to_string(),
                block_number: block,
                updated_at: chrono::Utc::now().timestamp(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn manager(store: Arc<MemoryStore>) -> CheckpointManager {
        CheckpointManager::new(store, "base-sepolia")
    }

    #[tokio::test]
    async fn load_takes_maximum_of_sources() {
        let store = Arc::new(MemoryStore::new());
        let mgr = manager(store.clone());

        let cp = mgr
            .load(
                ContractKind::LiraToken,
                CheckpointSeed { latest_event_block: Some(420), start_block: 100 },
            )
            .await
            .unwrap();
        assert_eq!(cp, 420);

        let cp = mgr
            .load(ContractKind::LiraProfile, CheckpointSeed { latest_event_block: None, start_block: 0 })
            .await
            .unwrap();
        assert_eq!(cp, 0);

        // created on first load
        let saved = store.load("base-sepolia", "LiraToken").await.unwrap().unwrap();
        assert_eq!(saved.block_number, 420);
    }

    #[tokio::test]
    async fn persisted_checkpoint_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        {
            let mgr = manager(store.clone());
            mgr.load(ContractKind::LiraSocialGraph, CheckpointSeed::default()).await.unwrap();
            mgr.advance(ContractKind::LiraSocialGraph, 900).await.unwrap();
        }

        let mgr = manager(store);
        let cp = mgr
            .load(
                ContractKind::LiraSocialGraph,
                CheckpointSeed { latest_event_block: None, start_block: 10 },
            )
            .await
            .unwrap();
        assert_eq!(cp, 900);
    }

    #[tokio::test]
    async fn advance_is_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let mgr = manager(store.clone());
        mgr.load(ContractKind::LiraToken, CheckpointSeed { latest_event_block: None, start_block: 500 })
            .await
            .unwrap();

        assert_eq!(mgr.advance(ContractKind::LiraToken, 520).await.unwrap(), 520);
        assert_eq!(mgr.advance(ContractKind::LiraToken, 510).await.unwrap(), 520);
        assert_eq!(mgr.get(ContractKind::LiraToken), Some(520));

        let saved = store.load("base-sepolia", "LiraToken").await.unwrap().unwrap();
        assert_eq!(saved.block_number, 520);
    }
}
