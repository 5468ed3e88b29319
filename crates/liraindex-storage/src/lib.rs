//! liraindex-storage — read-model backends for the LIRA indexer.
//!
//! Both backends implement `ProjectionStore` and `CheckpointStore`:
//! - `MemoryStore` (feature `memory`, default): nothing survives a restart
//! - `SqliteStorage` (feature `sqlite`): a single `sqlx` SQLite file

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "memory")]
pub use liraindex_core::memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
