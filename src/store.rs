//! The backend contract shared by both concurrency strategies
//!
//! [`HistoryStore`] is one interchangeable backend among several behind the
//! node's storage interface. Two implementations exist:
//!
//! - [`OrderedStore`](crate::ordered::OrderedStore): one reader/writer lock
//!   over ordered maps; all operations are linearizable across indexes.
//! - [`ConcurrentStore`](crate::concurrent::ConcurrentStore): independent
//!   concurrent maps per index; a save is only per-key atomic and ordered
//!   queries sort a per-query snapshot.
//!
//! Query semantics (ordering, markers, range classification) are identical
//! for both; only cross-index atomicity differs.

use crate::config::{StoreConfig, Strategy};
use crate::error::Result;
use crate::hooks::NodeHooks;
use crate::types::{
    AccountTxPageQuery, AccountTxQuery, BinaryTx, CountMinMax, Hash256, LedgerHashPair,
    LedgerInfo, LedgerSeq, SharedTx, TxLookup, TxMarker, ValidatedLedger,
};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Number of transactions returned by [`HistoryStore::tx_history`].
pub const TX_HISTORY_PAGE: usize = 20;

/// Storage contract for validated ledger and transaction history
pub trait HistoryStore: Send + Sync {
    // Ledger table

    /// Insert (or overwrite) the record for `ledger.info.seq`, fan the
    /// transactions out to every index, and, when `current`, evict a
    /// bounded batch of ledgers below the retention cutoff.
    fn save_validated_ledger(&self, ledger: &ValidatedLedger, current: bool) -> Result<()>;

    /// Ledger header by sequence
    fn ledger_info_by_seq(&self, seq: LedgerSeq) -> Option<LedgerInfo>;

    /// Ledger header by ledger hash
    fn ledger_info_by_hash(&self, hash: &Hash256) -> Option<LedgerInfo>;

    /// Header of the newest retained ledger
    fn newest_ledger_info(&self) -> Option<LedgerInfo>;

    /// Header of the oldest retained ledger
    fn oldest_ledger_info(&self) -> Option<LedgerInfo>;

    /// Oldest retained header with `seq >= first`
    fn limited_oldest_ledger_info(&self, first: LedgerSeq) -> Option<LedgerInfo>;

    /// Newest retained header, provided some retained ledger has `seq >= first`
    fn limited_newest_ledger_info(&self, first: LedgerSeq) -> Option<LedgerInfo>;

    /// Hash and parent hash of the ledger at `seq`
    fn ledger_hashes(&self, seq: LedgerSeq) -> Option<LedgerHashPair>;

    /// Hashes for every retained sequence in `[min, max]`
    fn ledger_hash_range(
        &self,
        min: LedgerSeq,
        max: LedgerSeq,
    ) -> BTreeMap<LedgerSeq, LedgerHashPair>;

    /// Smallest retained ledger sequence
    fn min_ledger_seq(&self) -> Option<LedgerSeq>;

    /// Largest retained ledger sequence
    fn max_ledger_seq(&self) -> Option<LedgerSeq>;

    /// Count and sequence bounds of the retained window
    fn ledger_count_min_max(&self) -> CountMinMax;

    // Global transaction index

    /// Look up a transaction by id. When absent and a range is given, the
    /// result classifies how conclusively the range rules the transaction
    /// out (see [`RangeCoverage`](crate::types::RangeCoverage)).
    fn transaction(&self, hash: &Hash256, range: Option<RangeInclusive<LedgerSeq>>) -> TxLookup;

    /// Up to [`TX_HISTORY_PAGE`] retained transactions, newest ledger first,
    /// skipping the first `skip`
    fn tx_history(&self, skip: usize) -> Vec<SharedTx>;

    /// Smallest ledger sequence referenced by the global transaction index
    fn min_transaction_ledger_seq(&self) -> Option<LedgerSeq>;

    /// Smallest ledger sequence referenced by any account index
    fn min_account_tx_ledger_seq(&self) -> Option<LedgerSeq>;

    // Account transaction index

    /// Account transactions ascending by `(ledger_seq, tx_seq)`; `offset`
    /// skips and `limit` truncates in ascending order
    fn oldest_account_txs(&self, query: &AccountTxQuery) -> Vec<SharedTx>;

    /// The newest matching account transactions. `offset` skips and `limit`
    /// truncates against the descending `(ledger_seq, tx_seq)` walk, but the
    /// selected records are returned in ascending order.
    fn newest_account_txs(&self, query: &AccountTxQuery) -> Vec<SharedTx>;

    /// Binary variant of [`oldest_account_txs`](Self::oldest_account_txs)
    fn oldest_account_txs_binary(&self, query: &AccountTxQuery) -> Vec<BinaryTx>;

    /// Binary variant of [`newest_account_txs`](Self::newest_account_txs)
    fn newest_account_txs_binary(&self, query: &AccountTxQuery) -> Vec<BinaryTx>;

    /// Cursor-paged ascending scan. Resumes strictly after the marker; a
    /// vanished marker resumes from the next greater key. The returned
    /// marker names the last included record and is present only when more
    /// matching records remain.
    fn oldest_account_tx_page(
        &self,
        query: &AccountTxPageQuery,
    ) -> (Vec<SharedTx>, Option<TxMarker>);

    /// Cursor-paged descending scan; mirror of
    /// [`oldest_account_tx_page`](Self::oldest_account_tx_page)
    fn newest_account_tx_page(
        &self,
        query: &AccountTxPageQuery,
    ) -> (Vec<SharedTx>, Option<TxMarker>);

    /// Binary variant of [`oldest_account_tx_page`](Self::oldest_account_tx_page)
    fn oldest_account_tx_page_binary(
        &self,
        query: &AccountTxPageQuery,
    ) -> (Vec<BinaryTx>, Option<TxMarker>);

    /// Binary variant of [`newest_account_tx_page`](Self::newest_account_tx_page)
    fn newest_account_tx_page_binary(
        &self,
        query: &AccountTxPageQuery,
    ) -> (Vec<BinaryTx>, Option<TxMarker>);

    // Maintenance

    /// Remove the transactions of the ledger at `seq` from every index,
    /// keeping the ledger header
    fn delete_transaction_by_ledger_seq(&self, seq: LedgerSeq);

    /// Remove every ledger with sequence below `seq` and all of its index
    /// entries
    fn delete_before_ledger_seq(&self, seq: LedgerSeq);

    /// Remove the transactions (but not headers) of every ledger below `seq`
    fn delete_transactions_before_ledger_seq(&self, seq: LedgerSeq);

    /// Remove account index entries below `seq`, leaving the other indexes
    /// untouched
    fn delete_account_transactions_before_ledger_seq(&self, seq: LedgerSeq);

    // Statistics

    /// Number of transactions in the global index
    fn transaction_count(&self) -> usize;

    /// Total entries across all account indexes
    fn account_transaction_count(&self) -> usize;

    /// Estimated memory footprint of all indexes, in KiB
    fn kb_used_all(&self) -> usize;

    /// Estimated memory footprint of the ledger table, in KiB
    fn kb_used_ledger(&self) -> usize;

    /// Estimated memory footprint of the transaction indexes, in KiB
    fn kb_used_transaction(&self) -> usize;

    // Lifecycle

    /// No-op; there is no persistent ledger handle to release
    fn close_ledger_db(&self) {}

    /// No-op; there is no persistent transaction handle to release
    fn close_transaction_db(&self) {}

    /// An in-memory store always has space
    fn ledger_db_has_space(&self) -> bool {
        true
    }

    /// An in-memory store always has space
    fn transaction_db_has_space(&self) -> bool {
        true
    }
}

/// Shared save-time validation: returns the accepted transactions when the
/// ledger's declared hashes check out, otherwise reports the failure (and,
/// for missing data, notifies the collaborators) without mutating anything.
pub(crate) fn validate_save<'a>(
    ledger: &'a ValidatedLedger,
    hooks: &dyn NodeHooks,
) -> Result<&'a [crate::types::AcceptedTx]> {
    use crate::error::Error;
    use crate::types::tx_set_hash;

    let info = &ledger.info;

    if info.account_hash.is_zero() || info.account_hash != ledger.state_hash {
        tracing::error!(
            seq = info.seq,
            declared = %info.account_hash,
            computed = %ledger.state_hash,
            "account state hash mismatch, save rejected"
        );
        return Err(Error::StateHashMismatch { seq: info.seq });
    }

    let txs = match &ledger.transactions {
        Some(txs) => txs.as_slice(),
        None => {
            tracing::warn!(seq = info.seq, "accepted ledger was missing transaction data");
            hooks.failed_save(info.seq, info.hash);
            // Clients can now trust the store for information about this
            // ledger sequence.
            hooks.finish_work(info.seq);
            return Err(Error::MissingTxData { seq: info.seq });
        }
    };

    if tx_set_hash(txs) != info.tx_hash {
        tracing::error!(seq = info.seq, "transaction set hash mismatch, save rejected");
        return Err(Error::TxSetHashMismatch { seq: info.seq });
    }

    Ok(txs)
}

/// Materialize the shared record for an accepted transaction.
pub(crate) fn make_record(seq: LedgerSeq, tx: &crate::types::AcceptedTx) -> SharedTx {
    Arc::new(crate::types::TxRecord {
        hash: tx.hash,
        tx_blob: tx.tx_blob.clone(),
        meta_blob: tx.meta_blob.clone(),
        ledger_seq: seq,
        tx_seq: tx.tx_seq,
        affected: tx.affected.clone(),
    })
}

/// Serialized row for the binary query variants.
pub(crate) fn binary_row(record: &crate::types::TxRecord) -> BinaryTx {
    BinaryTx {
        tx_blob: record.tx_blob.clone(),
        meta_blob: record.meta_blob.clone(),
        ledger_seq: record.ledger_seq,
    }
}

/// Open a history store with the strategy named by `config`
pub fn open(config: StoreConfig, hooks: Arc<dyn NodeHooks>) -> Result<Arc<dyn HistoryStore>> {
    config.validate()?;
    tracing::info!(
        strategy = ?config.strategy,
        history_window = config.history_window,
        eviction_batch = config.eviction_batch,
        "Opening history store"
    );
    Ok(match config.strategy {
        Strategy::CoarseLock => Arc::new(crate::ordered::OrderedStore::new(config, hooks)),
        Strategy::LockFree => Arc::new(crate::concurrent::ConcurrentStore::new(config, hooks)),
    })
}
