use std::sync::Arc;

use async_trait::async_trait;

use crate::entities::{EdgeType, SocialEdge};
use crate::error::IndexerError;
use crate::handler::EventHandler;
use crate::store::ProjectionStore;
use crate::types::{EventKind, RawLogEvent};

/// Follow, block and mute edges from `LiraSocialGraph`.
pub struct SocialHandler {
    store: Arc<dyn ProjectionStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Remove,
}

/// Edge type, operation, and the (source, target) argument names for an event.
fn shape(event: EventKind) -> Option<(EdgeType, Op, &'static str, &'static str)> {
    match event {
        EventKind::Followed => Some((EdgeType::Follow, Op::Add, "follower", "following")),
        EventKind::Unfollowed => Some((EdgeType::Follow, Op::Remove, "follower", "following")),
        EventKind::Blocked => Some((EdgeType::Block, Op::Add, "blocker", "blocked")),
        EventKind::Unblocked => Some((EdgeType::Block, Op::Remove, "blocker", "blocked")),
        EventKind::Muted => Some((EdgeType::Mute, Op::Add, "muter", "muted")),
        EventKind::Unmuted => Some((EdgeType::Mute, Op::Remove, "muter", "muted")),
        _ => None,
    }
}

impl SocialHandler {
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for SocialHandler {
    fn name(&self) -> &'static str {
        "social"
    }

    async fn apply(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
        let (edge_type, op, source_arg, target_arg) = shape(log.event)
            .ok_or_else(|| IndexerError::Other(format!("social handler cannot apply {}", log.event)))?;

        let source_address = log.args.address(source_arg)?;
        let target_address = log.args.address(target_arg)?;
        let source = self.store.ensure_user(&source_address).await?;
        let target = self.store.ensure_user(&target_address).await?;
        let edge = SocialEdge::new(source.id, target.id, edge_type);

        match (edge_type, op) {
            (EdgeType::Block, Op::Add) => self.store.block(source.id, target.id).await?,
            (_, Op::Add) => self.store.add_edge(edge).await?,
            (_, Op::Remove) => {
                if !self.store.remove_edge(edge).await? {
                    tracing::debug!(
                        event = %log.event,
                        from = %source_address,
                        to = %target_address,
                        "no edge to remove"
                    );
                }
            }
        }

        tracing::info!(event = %log.event, from = %source_address, to = %target_address, "social edge indexed");
        Ok(())
    }
}
