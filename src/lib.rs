//! In-memory hot-path store for validated ledger and transaction history
//!
//! Keeps a sliding window of the most recent validated ledgers fully indexed
//! in memory: by sequence, by ledger hash, by transaction id, and per
//! affected account in `(ledger_seq, tx_seq)` order. Saving the current
//! ledger evicts a bounded batch of expired history, so retention cost is
//! amortized across saves.
//!
//! Two interchangeable backends implement the [`HistoryStore`] contract,
//! selected by [`StoreConfig::strategy`]:
//!
//! - [`ordered::OrderedStore`] serializes everything behind one
//!   reader/writer lock and keeps its indexes in ordered maps.
//! - [`concurrent::ConcurrentStore`] shards each index into its own
//!   concurrent map and sorts query snapshots on read.
//!
//! ```
//! use ledger_hotstore::{open, NullHooks, StoreConfig};
//! use std::sync::Arc;
//!
//! let store = open(StoreConfig::default(), Arc::new(NullHooks)).unwrap();
//! assert!(store.min_ledger_seq().is_none());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod concurrent;
pub mod config;
pub mod error;
pub mod hooks;
pub mod ordered;
pub mod store;
pub mod types;

pub use config::{Strategy, StoreConfig, DEFAULT_EVICTION_BATCH, DEFAULT_HISTORY_WINDOW};
pub use error::{Error, Result};
pub use hooks::{NodeHooks, NullHooks};
pub use store::{open, HistoryStore, TX_HISTORY_PAGE};
pub use types::{
    tx_set_hash, AcceptedTx, AccountId, AccountTxPageQuery, AccountTxQuery, BinaryTx,
    CountMinMax, Hash256, LedgerHashPair, LedgerInfo, LedgerSeq, RangeCoverage, SharedTx,
    TxLookup, TxMarker, TxRecord, TxSeq, ValidatedLedger,
};
