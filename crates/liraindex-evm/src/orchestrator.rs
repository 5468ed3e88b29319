//! The orchestrator: startup, backfill and the live poll loop.
//!
//! # Startup
//! Resolve each configured contract (skip those without an address, drop
//! event names without a handler), spawn its apply queue and load its
//! checkpoint.
//!
//! # Backfill
//! Read the head once, then for every contract walk `(checkpoint, head]` in
//! `batch_size` chunks. Each chunk queries every routed event with retry,
//! applies the merged logs through the contract's queue and only then
//! advances the checkpoint. A chunk whose query still fails after retries is
//! abandoned and the checkpoint stays where it was.
//!
//! # Live
//! Push subscriptions feed the same queues when available. Independently, a
//! poll tick re-runs the chunk walk up to the current head. Ticks never
//! overlap: a slow tick delays the next one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use liraindex_core::checkpoint::{CheckpointManager, CheckpointSeed};
use liraindex_core::config::ContractSettings;
use liraindex_core::error::IndexerError;
use liraindex_core::handler::EventRouter;
use liraindex_core::indexer::IndexerState;
use liraindex_core::retry::{RetryConfig, RetryPolicy};
use liraindex_core::store::ProjectionStore;
use liraindex_core::types::{normalize_address, ContractBinding, ContractKind, RawLogEvent};

use crate::client::ChainClient;
use crate::queue::{self, ApplyQueue, ApplyStats, StatsSnapshot};

/// Runtime knobs of an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Checkpoint namespace, normally the network slug.
    pub chain_id: String,
    pub start_block: u64,
    pub poll_interval: Duration,
    /// Blocks per log query.
    pub batch_size: u64,
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            chain_id: "base-sepolia".into(),
            start_block: 0,
            poll_interval: Duration::from_millis(5000),
            batch_size: 1000,
            retry: RetryConfig::default(),
        }
    }
}

struct Tracked {
    binding: ContractBinding,
    queue: ApplyQueue,
}

struct Inner {
    config: OrchestratorConfig,
    contracts: Vec<ContractSettings>,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn ProjectionStore>,
    router: Arc<EventRouter>,
    checkpoints: CheckpointManager,
    retry: RetryPolicy,
    stats: Arc<ApplyStats>,
    state: Mutex<IndexerState>,
    tracked: OnceLock<Vec<Tracked>>,
    init_lock: tokio::sync::Mutex<()>,
    /// Held for a whole backfill or poll tick.
    tick_lock: tokio::sync::Mutex<()>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Drives every tracked contract from its checkpoint to the chain head and keeps it there.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub(crate) fn new(
        config: OrchestratorConfig,
        contracts: Vec<ContractSettings>,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn ProjectionStore>,
        checkpoints: CheckpointManager,
        router: EventRouter,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                retry: RetryPolicy::new(config.retry.clone()),
                config,
                contracts,
                client,
                store,
                router: Arc::new(router),
                checkpoints,
                stats: Arc::new(ApplyStats::default()),
                state: Mutex::new(IndexerState::Uninitialized),
                tracked: OnceLock::new(),
                init_lock: tokio::sync::Mutex::new(()),
                tick_lock: tokio::sync::Mutex::new(()),
                running: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    pub fn state(&self) -> IndexerState {
        self.inner.state()
    }

    /// Last fully applied block for `contract`, once initialized.
    pub fn checkpoint(&self, contract: ContractKind) -> Option<u64> {
        self.inner.checkpoints.get(contract)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Contracts actually tracked, with their routed events.
    pub fn bindings(&self) -> Vec<ContractBinding> {
        self.inner
            .tracked
            .get()
            .map(|t| t.iter().map(|t| t.binding.clone()).collect())
            .unwrap_or_default()
    }

    /// Resolve contracts and load checkpoints. Runs once; later calls are no-ops.
    pub async fn initialize(&self) -> Result<(), IndexerError> {
        self.inner.initialize().await
    }

    /// Initialize if needed, subscribe, backfill, then start the poll loop.
    ///
    /// Returns once backfill has finished and the poll loop is spawned.
    /// Calling it while running does nothing.
    pub async fn start(&self) -> Result<(), IndexerError> {
        let inner = &self.inner;
        if inner.state() == IndexerState::Stopped {
            return Err(IndexerError::Aborted {
                reason: "orchestrator was stopped".into(),
            });
        }
        if inner.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("orchestrator already running");
            return Ok(());
        }
        if let Err(e) = inner.initialize().await {
            inner.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        inner.subscribe_live().await;

        inner.set_state(IndexerState::BackfillRunning);
        inner.backfill().await;

        if !inner.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        inner.set_state(IndexerState::LivePolling);
        tokio::spawn(inner.clone().poll_loop());
        tracing::info!(poll_ms = inner.config.poll_interval.as_millis() as u64, "live polling started");
        Ok(())
    }

    /// Run one poll tick by hand. Waits for any tick already in progress.
    pub async fn poll_once(&self) {
        self.inner.poll_once().await
    }

    /// Apply a single log straight away, outside the contract queue.
    pub async fn process_event(&self, contract: ContractKind, log: &RawLogEvent) {
        queue::process_event(&self.inner.router, &self.inner.stats, contract, log).await
    }

    /// Stop scheduling work and close the store. In-flight applies are not cancelled.
    pub async fn stop(&self) -> Result<(), IndexerError> {
        let inner = &self.inner;
        inner.running.store(false, Ordering::SeqCst);
        inner.shutdown.send_replace(true);
        inner.set_state(IndexerState::Stopped);
        inner.store.close().await?;
        tracing::info!("orchestrator stopped");
        Ok(())
    }
}

impl Inner {
    fn state(&self) -> IndexerState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, next: IndexerState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *state != next {
            tracing::debug!(from = %*state, to = %next, "state change");
            *state = next;
        }
    }

    fn tracked(&self) -> &[Tracked] {
        self.tracked.get().map(Vec::as_slice).unwrap_or_default()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> Result<(), IndexerError> {
        let _guard = self.init_lock.lock().await;
        if self.tracked.get().is_some() {
            return Ok(());
        }
        self.set_state(IndexerState::Initializing);

        let mut tracked = Vec::new();
        for contract in &self.contracts {
            let Some(address) = contract.address.as_deref().filter(|a| !a.trim().is_empty()) else {
                tracing::warn!(contract = %contract.kind, "no address configured, contract not tracked");
                continue;
            };
            let address = normalize_address(address);

            let report = self.router.validate(contract.kind, &contract.events);
            if !report.unrouted.is_empty() {
                tracing::warn!(
                    contract = %contract.kind,
                    events = ?report.unrouted,
                    "events without a handler will not be tracked"
                );
            }
            if report.routed.is_empty() {
                tracing::warn!(contract = %contract.kind, "no routable events, contract not tracked");
                continue;
            }

            let seed = CheckpointSeed {
                latest_event_block: self.store.latest_event_block(&address).await?,
                start_block: self.config.start_block,
            };
            self.checkpoints.load(contract.kind, seed).await?;

            let (queue, _) = ApplyQueue::spawn(contract.kind, self.router.clone(), self.stats.clone());
            tracked.push(Tracked {
                binding: ContractBinding {
                    kind: contract.kind,
                    address,
                    events: report.routed,
                },
                queue,
            });
        }

        let count = tracked.len();
        if self.tracked.set(tracked).is_err() {
            tracing::warn!("orchestrator already initialized, keeping existing bindings");
            return Ok(());
        }
        tracing::info!(chain = %self.config.chain_id, contracts = count, "orchestrator initialized");
        Ok(())
    }

    async fn subscribe_live(&self) {
        for t in self.tracked() {
            for &event in &t.binding.events {
                let mut rx = match self.client.subscribe(&t.binding, event).await {
                    Ok(rx) => rx,
                    Err(e) => {
                        tracing::warn!(
                            contract = %t.binding.kind,
                            event = %event,
                            error = %e,
                            "live subscription unavailable, relying on polling"
                        );
                        continue;
                    }
                };
                let queue = t.queue.clone();
                let mut shutdown = self.shutdown.subscribe();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            log = rx.recv() => match log {
                                Some(log) => {
                                    if !queue.push_live(log) {
                                        break;
                                    }
                                }
                                None => break,
                            },
                            _ = shutdown.changed() => break,
                        }
                    }
                });
            }
        }
    }

    async fn backfill(&self) {
        let _tick = self.tick_lock.lock().await;
        let head = match self.client.block_number().await {
            Ok(head) => head,
            Err(e) => {
                tracing::error!(error = %e, "cannot read chain head, backfill deferred to polling");
                return;
            }
        };
        tracing::info!(head, "starting backfill");
        for t in self.tracked() {
            if !self.is_running() {
                return;
            }
            self.catch_up(t, head, "backfill").await;
        }
        tracing::info!(at = head, "backfill complete");
    }

    async fn poll_once(&self) {
        let _tick = self.tick_lock.lock().await;
        let head = match self.client.block_number().await {
            Ok(head) => head,
            Err(e) => {
                tracing::warn!(error = %e, "poll skipped, chain head unavailable");
                return;
            }
        };
        for t in self.tracked() {
            if !self.is_running() {
                return;
            }
            self.catch_up(t, head, "poll").await;
        }
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if !self.is_running() {
                break;
            }
            self.poll_once().await;
        }
        tracing::debug!("poll loop exited");
    }

    /// Walk `(checkpoint, head]` in chunks. Returns `false` if a chunk was abandoned.
    async fn catch_up(&self, t: &Tracked, head: u64, phase: &str) -> bool {
        let contract = t.binding.kind;
        let batch = self.config.batch_size.max(1);
        let mut from = self.checkpoints.get(contract).unwrap_or(0) + 1;

        while from <= head && self.is_running() {
            let to = head.min(from.saturating_add(batch - 1));
            let mut logs = Vec::new();

            for &event in &t.binding.events {
                let client = &self.client;
                let binding = &t.binding;
                let result = self
                    .retry
                    .run(
                        move || client.query_logs(binding, event, from, to),
                        |attempt, e, delay| {
                            tracing::warn!(
                                contract = %contract,
                                event = %event,
                                from,
                                to,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "log query failed, retrying"
                            );
                        },
                    )
                    .await;
                match result {
                    Ok(mut found) => logs.append(&mut found),
                    Err(e) => {
                        self.stats.range_failed();
                        tracing::error!(
                            contract = %contract,
                            event = %event,
                            from,
                            to,
                            error = %e,
                            "log query failed after retries, checkpoint not advanced"
                        );
                        return false;
                    }
                }
            }

            let count = logs.len();
            if count > 0 {
                if let Err(e) = t.queue.apply_range(logs).await {
                    tracing::error!(contract = %contract, from, to, error = %e, "range not applied");
                    return false;
                }
            }
            if let Err(e) = self.checkpoints.advance(contract, to).await {
                tracing::error!(contract = %contract, block = to, error = %e, "checkpoint not saved");
                return false;
            }

            tracing::info!(contract = %contract, phase, from, to, logs = count, "range applied");
            from = to + 1;
        }
        true
    }
}
