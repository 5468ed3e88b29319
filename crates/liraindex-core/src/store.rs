//! The persistent read-model contract.
//!
//! Handlers are the only writers. Every backend must enforce the uniqueness
//! keys documented on each entity in [`crate::entities`].

use async_trait::async_trait;

use crate::entities::{
    Profile, RoleKind, SocialEdge, StatDelta, Token, TokenEvent, TokenStat, User, UserTokenRole,
};
use crate::error::IndexerError;

/// Storage primitives over the projected entities.
///
/// Implementations: `MemoryStore` (this crate) and `SqliteStorage`
/// (`liraindex-storage`, feature `sqlite`).
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    // ─── Token events ────────────────────────────────────────────────────────

    /// Insert an audit row unless `(tx_hash, log_index)` already exists.
    ///
    /// Returns `false` when the row was a duplicate and nothing was written.
    async fn insert_token_event(&self, event: &TokenEvent) -> Result<bool, IndexerError>;

    /// Highest block number of any stored event for `token_address`.
    async fn latest_event_block(&self, token_address: &str) -> Result<Option<u64>, IndexerError>;

    /// All events for a token in `(block_number, log_index)` order.
    async fn token_events(&self, token_address: &str) -> Result<Vec<TokenEvent>, IndexerError>;

    // ─── Tokens ──────────────────────────────────────────────────────────────

    async fn token(&self, address: &str) -> Result<Option<Token>, IndexerError>;

    /// Insert or overwrite the token keyed by `token.address`.
    async fn save_token(&self, token: &Token) -> Result<(), IndexerError>;

    // ─── Token stats ─────────────────────────────────────────────────────────

    async fn token_stat(&self, token_address: &str) -> Result<Option<TokenStat>, IndexerError>;

    /// Create the stat row with `holder_count` if absent. Returns `false` if it existed.
    async fn create_token_stat(
        &self,
        token_address: &str,
        holder_count: u64,
    ) -> Result<bool, IndexerError>;

    /// Add `delta` to the stat row, creating an empty row first if needed.
    async fn record_activity(&self, token_address: &str, delta: StatDelta)
        -> Result<(), IndexerError>;

    // ─── Users & profiles ────────────────────────────────────────────────────

    async fn user(&self, address: &str) -> Result<Option<User>, IndexerError>;

    /// Fetch the user for `address`, creating it if this is the first sighting.
    async fn ensure_user(&self, address: &str) -> Result<User, IndexerError>;

    /// Set a user's handle. Fails if another user already holds it.
    async fn set_handle(&self, user_id: i64, handle: &str) -> Result<(), IndexerError>;

    async fn profile(&self, user_id: i64) -> Result<Option<Profile>, IndexerError>;

    async fn save_profile(&self, profile: &Profile) -> Result<(), IndexerError>;

    // ─── Roles ───────────────────────────────────────────────────────────────

    async fn role(
        &self,
        user_id: i64,
        token_address: &str,
        role: RoleKind,
    ) -> Result<Option<UserTokenRole>, IndexerError>;

    /// Insert or overwrite the role keyed by `(user_id, token_address, role)`.
    async fn save_role(&self, role: &UserTokenRole) -> Result<(), IndexerError>;

    async fn roles_for_token(&self, token_address: &str)
        -> Result<Vec<UserTokenRole>, IndexerError>;

    // ─── Social graph ────────────────────────────────────────────────────────

    /// Insert the edge if absent.
    async fn add_edge(&self, edge: SocialEdge) -> Result<(), IndexerError>;

    /// Delete the edge. Returns `false` if there was nothing to delete.
    async fn remove_edge(&self, edge: SocialEdge) -> Result<bool, IndexerError>;

    /// Atomically add `blocker → blocked` as a block edge and drop follow
    /// edges in both directions between the pair.
    async fn block(&self, blocker_id: i64, blocked_id: i64) -> Result<(), IndexerError>;

    async fn edge_exists(&self, edge: SocialEdge) -> Result<bool, IndexerError>;

    /// Every edge in either direction between two users.
    async fn edges_between(&self, a: i64, b: i64) -> Result<Vec<SocialEdge>, IndexerError>;

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Release the underlying connection. Later calls may fail.
    async fn close(&self) -> Result<(), IndexerError>;
}
