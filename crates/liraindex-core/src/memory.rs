//! In-memory projection + checkpoint store, for tests and ephemeral runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::entities::{
    EdgeType, Profile, RoleKind, SocialEdge, StatDelta, Token, TokenEvent, TokenStat, User,
    UserTokenRole,
};
use crate::error::IndexerError;
use crate::store::ProjectionStore;

#[derive(Default)]
struct State {
    events: Vec<TokenEvent>,
    event_keys: HashSet<(String, u32)>,
    tokens: HashMap<String, Token>,
    stats: HashMap<String, TokenStat>,
    users: HashMap<String, User>,
    next_user_id: i64,
    profiles: HashMap<i64, Profile>,
    roles: HashMap<(i64, String, RoleKind), UserTokenRole>,
    edges: HashSet<SocialEdge>,
    checkpoints: HashMap<(String, String), Checkpoint>,
    closed: bool,
}

/// Everything lives behind one mutex, so multi-row operations are atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total audit rows across all tokens.
    pub fn event_count(&self) -> usize {
        self.state().events.len()
    }

    pub fn user_count(&self) -> usize {
        self.state().users.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state().edges.len()
    }

    /// Whether [`ProjectionStore::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

#[async_trait]
impl ProjectionStore for MemoryStore {
    async fn insert_token_event(&self, event: &TokenEvent) -> Result<bool, IndexerError> {
        let mut state = self.state();
        if !state.event_keys.insert((event.tx_hash.clone(), event.log_index)) {
            return Ok(false);
        }
        state.events.push(event.clone());
        Ok(true)
    }

    async fn latest_event_block(&self, token_address: &str) -> Result<Option<u64>, IndexerError> {
        Ok(self
            .state()
            .events
            .iter()
            .filter(|e| e.token_address == token_address)
            .map(|e| e.block_number)
            .max())
    }

    async fn token_events(&self, token_address: &str) -> Result<Vec<TokenEvent>, IndexerError> {
        let mut events: Vec<_> = self
            .state()
            .events
            .iter()
            .filter(|e| e.token_address == token_address)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    async fn token(&self, address: &str) -> Result<Option<Token>, IndexerError> {
        Ok(self.state().tokens.get(address).cloned())
    }

    async fn save_token(&self, token: &Token) -> Result<(), IndexerError> {
        self.state().tokens.insert(token.address.clone(), token.clone());
        Ok(())
    }

    async fn token_stat(&self, token_address: &str) -> Result<Option<TokenStat>, IndexerError> {
        Ok(self.state().stats.get(token_address).cloned())
    }

    async fn create_token_stat(
        &self,
        token_address: &str,
        holder_count: u64,
    ) -> Result<bool, IndexerError> {
        let mut state = self.state();
        if state.stats.contains_key(token_address) {
            return Ok(false);
        }
        let mut stat = TokenStat::empty(token_address);
        stat.holder_count = holder_count;
        state.stats.insert(token_address.to_string(), stat);
        Ok(true)
    }

    async fn record_activity(
        &self,
        token_address: &str,
        delta: StatDelta,
    ) -> Result<(), IndexerError> {
        self.state()
            .stats
            .entry(token_address.to_string())
            .or_insert_with(|| TokenStat::empty(token_address))
            .apply(&delta);
        Ok(())
    }

    async fn user(&self, address: &str) -> Result<Option<User>, IndexerError> {
        Ok(self.state().users.get(address).cloned())
    }

    async fn ensure_user(&self, address: &str) -> Result<User, IndexerError> {
        let mut state = self.state();
        if let Some(user) = state.users.get(address) {
            return Ok(user.clone());
        }
        state.next_user_id += 1;
        let user = User { id: state.next_user_id, address: address.to_string(), handle: None };
        state.users.insert(address.to_string(), user.clone());
        Ok(user)
    }

    async fn set_handle(&self, user_id: i64, handle: &str) -> Result<(), IndexerError> {
        let mut state = self.state();
        let taken = state
            .users
            .values()
            .any(|u| u.id != user_id && u.handle.as_deref() == Some(handle));
        if taken {
            return Err(IndexerError::Storage(format!("handle '{handle}' already taken")));
        }
        let user = state
            .users
            .values_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| IndexerError::Storage(format!("no user with id {user_id}")))?;
        user.handle = Some(handle.to_string());
        Ok(())
    }

    async fn profile(&self, user_id: i64) -> Result<Option<Profile>, IndexerError> {
        Ok(self.state().profiles.get(&user_id).cloned())
    }

    async fn save_profile(&self, profile: &Profile) -> Result<(), IndexerError> {
        self.state().profiles.insert(profile.user_id, profile.clone());
        Ok(())
    }

    async fn role(
        &self,
        user_id: i64,
        token_address: &str,
        role: RoleKind,
    ) -> Result<Option<UserTokenRole>, IndexerError> {
        Ok(self
            .state()
            .roles
            .get(&(user_id, token_address.to_string(), role))
            .cloned())
    }

    async fn save_role(&self, role: &UserTokenRole) -> Result<(), IndexerError> {
        self.state()
            .roles
            .insert((role.user_id, role.token_address.clone(), role.role), role.clone());
        Ok(())
    }

    async fn roles_for_token(
        &self,
        token_address: &str,
    ) -> Result<Vec<UserTokenRole>, IndexerError> {
        let mut roles: Vec<_> = self
            .state()
            .roles
            .values()
            .filter(|r| r.token_address == token_address)
            .cloned()
            .collect();
        roles.sort_by_key(|r| (r.user_id, r.role.as_str()));
        Ok(roles)
    }

    async fn add_edge(&self, edge: SocialEdge) -> Result<(), IndexerError> {
        self.state().edges.insert(edge);
        Ok(())
    }

    async fn remove_edge(&self, edge: SocialEdge) -> Result<bool, IndexerError> {
        Ok(self.state().edges.remove(&edge))
    }

    async fn block(&self, blocker_id: i64, blocked_id: i64) -> Result<(), IndexerError> {
        let mut state = self.state();
        state.edges.insert(SocialEdge::new(blocker_id, blocked_id, EdgeType::Block));
        state.edges.remove(&SocialEdge::new(blocker_id, blocked_id, EdgeType::Follow));
        state.edges.remove(&SocialEdge::new(blocked_id, blocker_id, EdgeType::Follow));
        Ok(())
    }

    async fn edge_exists(&self, edge: SocialEdge) -> Result<bool, IndexerError> {
        Ok(self.state().edges.contains(&edge))
    }

    async fn edges_between(&self, a: i64, b: i64) -> Result<Vec<SocialEdge>, IndexerError> {
        Ok(self
            .state()
            .edges
            .iter()
            .filter(|e| {
                (e.follower_id == a && e.following_id == b)
                    || (e.follower_id == b && e.following_id == a)
            })
            .copied()
            .collect())
    }

    async fn close(&self) -> Result<(), IndexerError> {
        self.state().closed = true;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(
        &self,
        chain_id: &str,
        contract: &str,
    ) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self
            .state()
            .checkpoints
            .get(&(chain_id.to_string(), contract.to_string()))
            .cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        let key = (checkpoint.chain_id.clone(), checkpoint.contract.clone());
        self.state().checkpoints.insert(key, checkpoint);
        Ok(())
    }
}
