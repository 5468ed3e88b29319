//! Orchestrator lifecycle state.

use serde::{Deserialize, Serialize};

/// Runtime state of the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Constructed, contracts not yet resolved.
    Uninitialized,
    /// Resolving contracts and loading checkpoints.
    Initializing,
    /// Catching up from the checkpoints to the head seen at start.
    BackfillRunning,
    /// Backfill done; the poll loop is running.
    LivePolling,
    /// Stopped by a shutdown signal.
    Stopped,
}

impl IndexerState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::BackfillRunning | Self::LivePolling)
    }
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Initializing => write!(f, "initializing"),
            Self::BackfillRunning => write!(f, "backfill"),
            Self::LivePolling => write!(f, "live-polling"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
