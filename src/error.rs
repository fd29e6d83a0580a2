use thiserror::Error;

/// Errors the detection and lifecycle path must distinguish.
///
/// Malformed scripts are not represented here: the matcher treats them as
/// non-matches and returns `None`. Provider and notifier failures stay
/// `anyhow::Error` at the collaborator boundary; the orchestrator retries
/// them with backoff.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("conflicting transition for swap {lock_txid}: {existing} vs {proposed}")]
    ConflictingTransition {
        lock_txid: String,
        existing: String,
        proposed: String,
    },

    #[error("swap not found: {0}")]
    SwapNotFound(String),

    #[error("no BTC/XMR exchange rate available")]
    RateUnavailable,

    #[error("ledger access failed: {0}")]
    Persistence(#[from] rusqlite::Error),
}
