//! Error types for the LIRA indexing pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting and projecting contract logs.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for failures a later attempt may not hit (node or network trouble).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` if the error must stop the process at startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(IndexerError::Rpc("timeout".into()).is_transient());
        assert!(!IndexerError::Storage("locked".into()).is_transient());
        assert!(IndexerError::Config("unknown network".into()).is_fatal());
        assert!(!IndexerError::Decode("short data".into()).is_fatal());
    }

    #[test]
    fn aborted_is_fatal() {
        let err = IndexerError::Aborted {
            reason: "orchestrator was stopped".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Indexer aborted: orchestrator was stopped");
    }

    #[test]
    fn handler_display() {
        let err = IndexerError::Handler {
            handler: "social".into(),
            reason: "user missing".into(),
        };
        assert_eq!(err.to_string(), "Handler error in 'social': user missing");
    }
}
