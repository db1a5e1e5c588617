//! Error types for the history store
//!
//! Only save-time validation failures are errors; not-found conditions and
//! vanished pagination markers are encoded in return values.

use crate::types::LedgerSeq;
use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// History store errors
#[derive(Error, Debug)]
pub enum Error {
    /// Declared account-state hash is zero or does not match the state tree
    #[error("ledger {seq}: account state hash mismatch")]
    StateHashMismatch {
        /// Sequence of the rejected ledger
        seq: LedgerSeq,
    },

    /// Declared transaction-set hash does not match the computed commitment
    #[error("ledger {seq}: transaction set hash mismatch")]
    TxSetHashMismatch {
        /// Sequence of the rejected ledger
        seq: LedgerSeq,
    },

    /// Transaction bodies for the ledger are not available locally
    #[error("ledger {seq}: missing transaction data")]
    MissingTxData {
        /// Sequence of the rejected ledger
        seq: LedgerSeq,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
