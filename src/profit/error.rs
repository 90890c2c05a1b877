//! Error types for the ledger and the engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Store accepted the append but handed back fewer records than trades
    #[error("append returned {returned} records for {expected} trades")]
    ShortAppend { expected: usize, returned: usize },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Chain was not normalized/validated before reaching the core
    #[error("chain '{0}' is not tracked")]
    UntrackedChain(String),

    /// Rebuild from the ledger failed; the live state was left untouched
    #[error("reconciliation failed for chain '{chain}': {source}")]
    Reconcile {
        chain: String,
        #[source]
        source: LedgerError,
    },
}
