//! Per-contract apply queue.
//!
//! Each tracked contract owns one worker task. Live deliveries and backfill
//! or poll ranges funnel through it, so logs of one contract are applied one
//! at a time. Everything queued when the worker wakes up is merged, sorted by
//! `(block, log_index)` and deduplicated before it is applied.
//!
//! The worker remembers the highest position it has applied. A live log at or
//! below that mark arrived after a range already covered it and is dropped.
//! Range deliveries are always applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use liraindex_core::error::IndexerError;
use liraindex_core::handler::{Dispatch, EventRouter};
use liraindex_core::types::{ContractKind, RawLogEvent};

/// Counters shared by every queue of one orchestrator.
#[derive(Debug, Default)]
pub struct ApplyStats {
    applied: AtomicU64,
    failed: AtomicU64,
    unrouted: AtomicU64,
    range_failures: AtomicU64,
    stale_live: AtomicU64,
}

/// Point-in-time copy of [`ApplyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Logs a handler applied (duplicates included).
    pub applied: u64,
    /// Logs whose handler returned an error.
    pub failed: u64,
    /// Logs with no handler.
    pub unrouted: u64,
    /// Block ranges abandoned after retries.
    pub range_failures: u64,
    /// Live logs dropped because a range had already applied past them.
    pub stale_live: u64,
}

impl ApplyStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            range_failures: self.range_failures.load(Ordering::Relaxed),
            stale_live: self.stale_live.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn range_failed(&self) {
        self.range_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Route one log and record the outcome. Handler errors are logged, never returned.
pub async fn process_event(
    router: &EventRouter,
    stats: &ApplyStats,
    contract: ContractKind,
    log: &RawLogEvent,
) {
    match router.dispatch(contract, log).await {
        Ok(Dispatch::Applied) => {
            stats.applied.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Dispatch::Unrouted) => {
            stats.unrouted.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                contract = %contract,
                event = %log.event,
                block = log.block_number,
                tx_hash = %log.tx_hash,
                log_index = log.log_index,
                error = %e,
                "failed to apply log"
            );
        }
    }
}

enum Delivery {
    Live(RawLogEvent),
    Range {
        logs: Vec<RawLogEvent>,
        done: oneshot::Sender<()>,
    },
}

/// Handle to one contract's worker.
#[derive(Clone)]
pub struct ApplyQueue {
    contract: ContractKind,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ApplyQueue {
    pub fn spawn(
        contract: ContractKind,
        router: Arc<EventRouter>,
        stats: Arc<ApplyStats>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(worker(contract, router, stats, rx));
        (Self { contract, tx }, handle)
    }

    pub fn contract(&self) -> ContractKind {
        self.contract
    }

    /// Enqueue a pushed log. Returns `false` if the worker is gone.
    pub fn push_live(&self, log: RawLogEvent) -> bool {
        self.tx.send(Delivery::Live(log)).is_ok()
    }

    /// Enqueue a queried range and wait until every log in it has been applied.
    pub async fn apply_range(&self, logs: Vec<RawLogEvent>) -> Result<(), IndexerError> {
        let (done, applied) = oneshot::channel();
        self.tx
            .send(Delivery::Range { logs, done })
            .map_err(|_| IndexerError::Aborted {
                reason: format!("{} apply queue closed", self.contract),
            })?;
        applied
            .await
            .map_err(|_| IndexerError::Aborted {
                reason: format!("{} apply queue dropped a range", self.contract),
            })
    }
}

async fn worker(
    contract: ContractKind,
    router: Arc<EventRouter>,
    stats: Arc<ApplyStats>,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
) {
    let mut high_water: Option<(u64, u32)> = None;
    while let Some(first) = rx.recv().await {
        let mut logs = Vec::new();
        let mut waiters = Vec::new();
        let mut next = Some(first);
        while let Some(delivery) = next {
            match delivery {
                Delivery::Live(log) if high_water.is_some_and(|mark| log.order_key() <= mark) => {
                    stats.stale_live.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        contract = %contract,
                        event = %log.event,
                        block = log.block_number,
                        log_index = log.log_index,
                        "stale live log dropped"
                    );
                }
                Delivery::Live(log) => logs.push(log),
                Delivery::Range { logs: mut range, done } => {
                    logs.append(&mut range);
                    waiters.push(done);
                }
            }
            next = rx.try_recv().ok();
        }

        logs.sort_by_key(|l| l.order_key());
        logs.dedup_by(|a, b| a.dedup_key() == b.dedup_key());

        for log in &logs {
            process_event(&router, &stats, contract, log).await;
        }
        if let Some(last) = logs.last() {
            high_water = high_water.max(Some(last.order_key()));
        }
        for done in waiters {
            let _ = done.send(());
        }
    }
    tracing::debug!(contract = %contract, "apply queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use liraindex_core::handler::{EventHandler, HandlerFamily};
    use liraindex_core::memory::MemoryStore;
    use liraindex_core::types::{EventArgs, EventKind};
    use std::sync::Mutex;

    struct Recorder {
        seen: Arc<Mutex<Vec<(u64, u32)>>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn apply(&self, log: &RawLogEvent) -> Result<(), IndexerError> {
            self.seen.lock().unwrap().push(log.order_key());
            if log.tx_hash == "0xbad" {
                return Err(IndexerError::Storage("boom".into()));
            }
            Ok(())
        }
    }

    fn log(block: u64, index: u32, tx: &str) -> RawLogEvent {
        RawLogEvent {
            contract_address: "0xaa".into(),
            event: EventKind::Followed,
            args: EventArgs::new(),
            tx_hash: tx.into(),
            block_number: block,
            block_timestamp: 0,
            log_index: index,
        }
    }

    fn queue() -> (ApplyQueue, Arc<ApplyStats>, Arc<Mutex<Vec<(u64, u32)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let router = EventRouter::new(Arc::new(MemoryStore::new()))
            .with_handler(HandlerFamily::Social, Arc::new(Recorder { seen: seen.clone() }));
        let stats = Arc::new(ApplyStats::default());
        let (queue, _) = ApplyQueue::spawn(ContractKind::LiraSocialGraph, Arc::new(router), stats.clone());
        (queue, stats, seen)
    }

    #[tokio::test]
    async fn range_is_applied_in_chain_order() {
        let (queue, stats, seen) = queue();
        queue
            .apply_range(vec![log(5, 1, "0xc"), log(3, 0, "0xa"), log(5, 0, "0xb")])
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(3, 0), (5, 0), (5, 1)]);
        assert_eq!(stats.snapshot().applied, 3);
    }

    #[tokio::test]
    async fn live_and_range_copies_are_merged() {
        let (queue, _, seen) = queue();
        assert!(queue.push_live(log(7, 0, "0xd")));
        queue.apply_range(vec![log(7, 0, "0xd"), log(6, 2, "0xe")]).await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&(6, 2)));
        assert_eq!(seen.iter().filter(|k| **k == (7, 0)).count(), 1);
    }

    #[tokio::test]
    async fn late_live_copy_is_not_reapplied() {
        let (queue, stats, seen) = queue();
        queue
            .apply_range(vec![log(4, 0, "0xfollow"), log(5, 0, "0xunfollow")])
            .await
            .unwrap();

        assert!(queue.push_live(log(4, 0, "0xfollow")));
        assert!(queue.push_live(log(6, 1, "0xnew")));
        // a range round-trip guarantees the worker drained both pushes
        queue.apply_range(Vec::new()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(4, 0), (5, 0), (6, 1)]);
        assert_eq!(stats.snapshot().stale_live, 1);
    }

    #[tokio::test]
    async fn range_below_live_mark_is_still_applied() {
        let (queue, _, seen) = queue();
        assert!(queue.push_live(log(9, 0, "0xlive")));
        queue.apply_range(Vec::new()).await.unwrap();
        queue.apply_range(vec![log(8, 3, "0xolder")]).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(9, 0), (8, 3)]);
    }

    #[tokio::test]
    async fn handler_failure_does_not_block_next_log() {
        let (queue, stats, seen) = queue();
        queue.apply_range(vec![log(1, 0, "0xbad"), log(2, 0, "0xok")]).await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 2);
        let snap = stats.snapshot();
        assert_eq!((snap.applied, snap.failed), (1, 1));
    }
}
