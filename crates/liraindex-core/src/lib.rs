//! liraindex-core — the projection side of the LIRA contract indexer.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator (liraindex-evm)
//!     ├── CheckpointManager  (per-contract last applied block)
//!     ├── RetryPolicy        (wraps log range queries)
//!     └── EventRouter        ((contract, event) → handler)
//!             ├── TokenHandler     Transfer, Approval
//!             ├── RegistryHandler  TokenRegistered, TokenUpdated, TokenRemoved
//!             ├── ProfileHandler   ProfileCreated, ProfileUpdated, HandleUpdated, PrimaryTokenLinked
//!             ├── SocialHandler    Followed … Unmuted
//!             └── FactoryHandler   TokenLaunched, *TokenCreated
//!                     └── ProjectionStore (memory / SQLite)
//! ```

pub mod checkpoint;
pub mod config;
pub mod entities;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod indexer;
pub mod memory;
pub mod retry;
pub mod store;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointSeed, CheckpointStore};
pub use config::{ContractSettings, IndexerSettings, NetworkSettings};
pub use error::IndexerError;
pub use handler::{Dispatch, EventHandler, EventRouter, HandlerFamily, RouteReport};
pub use indexer::IndexerState;
pub use memory::MemoryStore;
pub use retry::{RetryConfig, RetryPolicy};
pub use store::ProjectionStore;
pub use types::{AbiValue, ContractBinding, ContractKind, EventArgs, EventKind, RawLogEvent};
