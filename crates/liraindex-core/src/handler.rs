//! Event handler trait and the static `(contract, event)` router.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::handlers::{FactoryHandler, ProfileHandler, RegistryHandler, SocialHandler, TokenHandler};
use crate::store::ProjectionStore;
use crate::types::{ContractKind, EventKind, RawLogEvent};

/// Applies one decoded log to the read model.
///
/// Implementations must be safe to call again with the same log: delivery
/// is at-least-once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short family name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn apply(&self, log: &RawLogEvent) -> Result<(), IndexerError>;
}

/// The five handler families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerFamily {
    Token,
    Registry,
    Profile,
    Social,
    Factory,
}

impl HandlerFamily {
    /// The closed routing table.
    pub fn route(contract: ContractKind, event: EventKind) -> Option<Self> {
        use ContractKind as C;
        use EventKind as E;
        match (contract, event) {
            (C::LiraToken, E::Transfer | E::Approval) => Some(Self::Token),
            (C::LiraTokenRegistry, E::TokenRegistered | E::TokenUpdated | E::TokenRemoved) => {
                Some(Self::Registry)
            }
            (
                C::LiraProfile,
                E::ProfileCreated | E::ProfileUpdated | E::HandleUpdated | E::PrimaryTokenLinked,
            ) => Some(Self::Profile),
            (
                C::LiraSocialGraph,
                E::Followed | E::Unfollowed | E::Blocked | E::Unblocked | E::Muted | E::Unmuted,
            ) => Some(Self::Social),
            (C::TokenLaunchFactory, E::TokenLaunched) => Some(Self::Factory),
            (
                C::LiraUserTokenFactory,
                E::ReputationTokenCreated | E::SocialTokenCreated | E::AccessTokenCreated,
            ) => Some(Self::Factory),
            _ => None,
        }
    }
}

/// Outcome of [`EventRouter::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    /// No handler for this `(contract, event)`; the log was dropped.
    Unrouted,
}

/// Result of checking a contract's configured event names against the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub routed: Vec<EventKind>,
    pub unrouted: Vec<String>,
}

/// Maps `(contract, event)` to a handler.
pub struct EventRouter {
    handlers: HashMap<HandlerFamily, Arc<dyn EventHandler>>,
}

impl EventRouter {
    /// Build the router with the standard handler for every family.
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        let mut handlers: HashMap<HandlerFamily, Arc<dyn EventHandler>> = HashMap::new();
        handlers.insert(HandlerFamily::Token, Arc::new(TokenHandler::new(store.clone())));
        handlers.insert(HandlerFamily::Registry, Arc::new(RegistryHandler::new(store.clone())));
        handlers.insert(HandlerFamily::Profile, Arc::new(ProfileHandler::new(store.clone())));
        handlers.insert(HandlerFamily::Social, Arc::new(SocialHandler::new(store.clone())));
        handlers.insert(HandlerFamily::Factory, Arc::new(FactoryHandler::new(store)));
        Self { handlers }
    }

    /// Replace one family's handler.
    pub fn with_handler(mut self, family: HandlerFamily, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(family, handler);
        self
    }

    pub fn handler_for(
        &self,
        contract: ContractKind,
        event: EventKind,
    ) -> Option<&Arc<dyn EventHandler>> {
        HandlerFamily::route(contract, event).and_then(|family| self.handlers.get(&family))
    }

    /// Split configured event names into routable kinds and the rest.
    pub fn validate(&self, contract: ContractKind, configured: &[String]) -> RouteReport {
        let mut report = RouteReport::default();
        for name in configured {
            match EventKind::from_name(name) {
                Some(event) if self.handler_for(contract, event).is_some() => {
                    if !report.routed.contains(&event) {
                        report.routed.push(event);
                    }
                }
                _ => report.unrouted.push(name.clone()),
            }
        }
        report
    }

    /// Route `log` to its handler and apply it.
    ///
    /// A routing miss is logged and reported as [`Dispatch::Unrouted`].
    /// Handler failures come back as [`IndexerError::Handler`].
    pub async fn dispatch(
        &self,
        contract: ContractKind,
        log: &RawLogEvent,
    ) -> Result<Dispatch, IndexerError> {
        let Some(handler) = self.handler_for(contract, log.event) else {
            tracing::warn!(
                contract = %contract,
                event = %log.event,
                tx_hash = %log.tx_hash,
                "no handler registered, dropping log"
            );
            return Ok(Dispatch::Unrouted);
        };

        handler.apply(log).await.map_err(|e| IndexerError::Handler {
            handler: format!("{}::{}", handler.name(), log.event),
            reason: e.to_string(),
        })?;
        Ok(Dispatch::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::EventArgs;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        count: Arc<AtomicU32>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn apply(&self, _log: &RawLogEvent) -> Result<(), IndexerError> {
            self.count.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn log(event: EventKind) -> RawLogEvent {
        RawLogEvent {
            contract_address: "0xaa".into(),
            event,
            args: EventArgs::new(),
            tx_hash: "0x01".into(),
            block_number: 1,
            block_timestamp: 0,
            log_index: 0,
        }
    }

    #[test]
    fn every_event_has_exactly_one_contract() {
        for event in EventKind::ALL {
            let routes = ContractKind::ALL
                .into_iter()
                .filter(|c| HandlerFamily::route(*c, event).is_some())
                .count();
            assert_eq!(routes, 1, "{event} routed {routes} times");
        }
    }

    #[test]
    fn validate_reports_unhandled_names() {
        let router = EventRouter::new(Arc::new(MemoryStore::new()));
        let configured: Vec<String> = ["Transfer", "Approval", "TreasuryUpdated", "Followed"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let report = router.validate(ContractKind::LiraToken, &configured);
        assert_eq!(report.routed, vec![EventKind::Transfer, EventKind::Approval]);
        assert_eq!(report.unrouted, vec!["TreasuryUpdated".to_string(), "Followed".to_string()]);
    }

    #[tokio::test]
    async fn dispatch_routes_and_drops_misses() {
        let count = Arc::new(AtomicU32::new(0));
        let router = EventRouter::new(Arc::new(MemoryStore::new()))
            .with_handler(HandlerFamily::Social, Arc::new(CountingHandler { count: count.clone() }));

        let applied = router
            .dispatch(ContractKind::LiraSocialGraph, &log(EventKind::Muted))
            .await
            .unwrap();
        assert_eq!(applied, Dispatch::Applied);

        let missed = router
            .dispatch(ContractKind::LiraProfile, &log(EventKind::Muted))
            .await
            .unwrap();
        assert_eq!(missed, Dispatch::Unrouted);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn handler_failure_is_wrapped() {
        let router = EventRouter::new(Arc::new(MemoryStore::new()));
        // Transfer without args cannot be applied
        let err = router
            .dispatch(ContractKind::LiraToken, &log(EventKind::Transfer))
            .await
            .unwrap_err();
        match err {
            IndexerError::Handler { handler, .. } => assert_eq!(handler, "token::Transfer"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
