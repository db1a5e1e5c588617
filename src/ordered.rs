//! Coarse-lock strategy: one reader/writer lock over ordered maps
//!
//! A single `parking_lot::RwLock` guards all four indexes, so every
//! operation, including the eviction batch inside a save, is linearizable
//! across indexes. The ledger table and the per-account indexes are
//! `BTreeMap`s, giving `O(log n)` range scans and natural oldest/newest
//! iteration; the hash lookups are plain `HashMap`s since their ordering is
//! never observed.

use crate::config::StoreConfig;
use crate::error::Result;
use crate::hooks::NodeHooks;
use crate::store::{binary_row, make_record, validate_save, HistoryStore, TX_HISTORY_PAGE};
use crate::types::{
    AccountId, AccountTxPageQuery, AccountTxQuery, BinaryTx, CountMinMax, Hash256,
    LedgerHashPair, LedgerInfo, LedgerSeq, RangeCoverage, SharedTx, TxLookup, TxMarker, TxSeq,
    ValidatedLedger,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::mem::size_of;
use std::ops::{Bound, RangeInclusive};
use std::sync::Arc;

/// Ordering key of an account index entry.
type TxKey = (LedgerSeq, TxSeq);

struct LedgerData {
    info: LedgerInfo,
    txs: BTreeMap<Hash256, SharedTx>,
}

#[derive(Default)]
struct AccountData {
    txs: BTreeMap<TxKey, SharedTx>,
}

#[derive(Default)]
struct Indexes {
    ledgers: BTreeMap<LedgerSeq, LedgerData>,
    hash_to_seq: HashMap<Hash256, LedgerSeq>,
    txs: HashMap<Hash256, SharedTx>,
    accounts: HashMap<AccountId, AccountData>,
}

/// History store backed by ordered maps under one reader/writer lock
pub struct OrderedStore {
    config: StoreConfig,
    hooks: Arc<dyn NodeHooks>,
    indexes: RwLock<Indexes>,
}

impl fmt::Debug for OrderedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OrderedStore {
    /// Create an empty store
    pub fn new(config: StoreConfig, hooks: Arc<dyn NodeHooks>) -> Self {
        Self {
            config,
            hooks,
            indexes: RwLock::new(Indexes::default()),
        }
    }

    /// Amortized removal of ledgers below the retention cutoff. Runs under
    /// the exclusive lock already held by the save that triggered it.
    fn evict(&self, indexes: &mut Indexes, tip: LedgerSeq) {
        let cutoff = tip.saturating_sub(self.config.history_window);
        if cutoff == 0 {
            return;
        }

        let batch: Vec<LedgerSeq> = indexes
            .ledgers
            .range(..cutoff)
            .take(self.config.eviction_batch)
            .map(|(seq, _)| *seq)
            .collect();
        if batch.is_empty() {
            return;
        }

        let mut touched: BTreeSet<AccountId> = BTreeSet::new();
        let mut last_removed = 0;
        let removed = batch.len();
        for seq in batch {
            if let Some(data) = indexes.ledgers.remove(&seq) {
                for (hash, record) in &data.txs {
                    indexes.txs.remove(hash);
                    touched.extend(record.affected.iter().copied());
                }
                indexes.hash_to_seq.remove(&data.info.hash);
                last_removed = seq;
            }
        }

        // Prune account entries only up to the largest sequence actually
        // evicted; ledgers between that and the cutoff survived this batch
        // and keep their entries.
        let prune_below = last_removed + 1;
        for account in &touched {
            let now_empty = match indexes.accounts.get_mut(account) {
                Some(data) => {
                    data.txs = data.txs.split_off(&(prune_below, TxSeq::MIN));
                    data.txs.is_empty()
                }
                None => false,
            };
            if now_empty {
                indexes.accounts.remove(account);
            }
        }

        tracing::debug!(cutoff, removed, "evicted ledger batch");
        self.hooks.clear_prior_ledgers(cutoff);
    }

    /// Unpaged account scan. The oldest flavor walks ascending; the newest
    /// flavor consumes offset and limit against the descending walk, then
    /// reverses, so a truncating limit keeps the newest matches but the
    /// caller still receives ascending order.
    fn scan_account(&self, query: &AccountTxQuery, newest: bool) -> Vec<SharedTx> {
        if !query.unlimited && query.limit == 0 {
            return Vec::new();
        }
        if query.min_ledger > query.max_ledger {
            return Vec::new();
        }

        let indexes = self.indexes.read();
        let Some(data) = indexes.accounts.get(&query.account) else {
            return Vec::new();
        };

        let lower = (query.min_ledger, TxSeq::MIN);
        let upper = (query.max_ledger, TxSeq::MAX);
        let take = if query.unlimited { usize::MAX } else { query.limit };

        let range = data.txs.range(lower..=upper);
        if newest {
            let mut result: Vec<SharedTx> = range
                .rev()
                .skip(query.offset)
                .take(take)
                .map(|(_, record)| record.clone())
                .collect();
            result.reverse();
            result
        } else {
            range
                .skip(query.offset)
                .take(take)
                .map(|(_, record)| record.clone())
                .collect()
        }
    }

    /// Cursor-paged account scan shared by the object and binary variants.
    /// Resumes strictly after the marker key; a vanished marker resumes from
    /// the next remaining key in scan direction.
    fn page_account(
        &self,
        query: &AccountTxPageQuery,
        newest: bool,
    ) -> (Vec<SharedTx>, Option<TxMarker>) {
        if query.min_ledger > query.max_ledger {
            return (Vec::new(), None);
        }

        let indexes = self.indexes.read();
        let Some(data) = indexes.accounts.get(&query.account) else {
            return (Vec::new(), None);
        };

        let lower = (query.min_ledger, TxSeq::MIN);
        let upper = (query.max_ledger, TxSeq::MAX);

        let iter: Box<dyn Iterator<Item = (&TxKey, &SharedTx)> + '_> = if newest {
            let end = match query.marker {
                Some(marker) if marker.key() <= lower => return (Vec::new(), None),
                Some(marker) => Bound::Excluded(marker.key()),
                None => Bound::Included(upper),
            };
            Box::new(
                data.txs
                    .range((Bound::Included(lower), end))
                    .rev()
                    .filter(move |(key, _)| **key <= upper),
            )
        } else {
            let start = match query.marker {
                Some(marker) if marker.key() >= upper => return (Vec::new(), None),
                Some(marker) => Bound::Excluded(marker.key()),
                None => Bound::Included(lower),
            };
            Box::new(
                data.txs
                    .range((start, Bound::Included(upper)))
                    .filter(move |(key, _)| **key >= lower),
            )
        };

        let limit = if query.limit == 0 { usize::MAX } else { query.limit };
        let mut result = Vec::new();
        let mut marker = None;
        let mut iter = iter.peekable();
        while let Some((key, record)) = iter.next() {
            self.hooks.unsaved_ledger(key.0);
            result.push(record.clone());
            if result.len() >= limit {
                if iter.peek().is_some() {
                    marker = Some(TxMarker {
                        ledger_seq: key.0,
                        tx_seq: key.1,
                    });
                }
                break;
            }
        }
        (result, marker)
    }

    fn bytes_used_ledger(indexes: &Indexes) -> usize {
        let mut size = indexes.ledgers.len() * (size_of::<LedgerSeq>() + size_of::<LedgerData>());
        size += indexes.hash_to_seq.len() * (size_of::<Hash256>() + size_of::<LedgerSeq>());
        size
    }

    fn bytes_used_transaction(indexes: &Indexes) -> usize {
        let mut size = 0;
        for record in indexes.txs.values() {
            size += size_of::<Hash256>() + size_of::<crate::types::TxRecord>();
            size += record.tx_blob.len() + record.meta_blob.len();
        }
        for data in indexes.accounts.values() {
            size += size_of::<AccountId>() + size_of::<AccountData>();
            size += data.txs.len() * (size_of::<TxKey>() + size_of::<SharedTx>());
        }
        size
    }
}

impl HistoryStore for OrderedStore {
    fn save_validated_ledger(&self, ledger: &ValidatedLedger, current: bool) -> Result<()> {
        let txs = validate_save(ledger, self.hooks.as_ref())?;
        let info = &ledger.info;
        tracing::trace!(seq = info.seq, current, "save_validated_ledger");

        let mut indexes = self.indexes.write();
        let mut data = LedgerData {
            info: info.clone(),
            txs: BTreeMap::new(),
        };
        for tx in txs {
            let record = make_record(info.seq, tx);
            data.txs.insert(tx.hash, record.clone());
            indexes.txs.insert(tx.hash, record.clone());
            for account in &tx.affected {
                indexes
                    .accounts
                    .entry(*account)
                    .or_default()
                    .txs
                    .insert((info.seq, tx.tx_seq), record.clone());
            }
        }
        indexes.ledgers.insert(info.seq, data);
        indexes.hash_to_seq.insert(info.hash, info.seq);

        if current {
            self.evict(&mut indexes, info.seq);
        }
        Ok(())
    }

    fn ledger_info_by_seq(&self, seq: LedgerSeq) -> Option<LedgerInfo> {
        let indexes = self.indexes.read();
        indexes.ledgers.get(&seq).map(|data| data.info.clone())
    }

    fn ledger_info_by_hash(&self, hash: &Hash256) -> Option<LedgerInfo> {
        let indexes = self.indexes.read();
        let seq = indexes.hash_to_seq.get(hash)?;
        indexes.ledgers.get(seq).map(|data| data.info.clone())
    }

    fn newest_ledger_info(&self) -> Option<LedgerInfo> {
        let indexes = self.indexes.read();
        indexes
            .ledgers
            .values()
            .next_back()
            .map(|data| data.info.clone())
    }

    fn oldest_ledger_info(&self) -> Option<LedgerInfo> {
        let indexes = self.indexes.read();
        indexes.ledgers.values().next().map(|data| data.info.clone())
    }

    fn limited_oldest_ledger_info(&self, first: LedgerSeq) -> Option<LedgerInfo> {
        let indexes = self.indexes.read();
        indexes
            .ledgers
            .range(first..)
            .next()
            .map(|(_, data)| data.info.clone())
    }

    fn limited_newest_ledger_info(&self, first: LedgerSeq) -> Option<LedgerInfo> {
        let indexes = self.indexes.read();
        indexes.ledgers.range(first..).next()?;
        indexes
            .ledgers
            .values()
            .next_back()
            .map(|data| data.info.clone())
    }

    fn ledger_hashes(&self, seq: LedgerSeq) -> Option<LedgerHashPair> {
        let indexes = self.indexes.read();
        indexes.ledgers.get(&seq).map(|data| LedgerHashPair {
            hash: data.info.hash,
            parent_hash: data.info.parent_hash,
        })
    }

    fn ledger_hash_range(
        &self,
        min: LedgerSeq,
        max: LedgerSeq,
    ) -> BTreeMap<LedgerSeq, LedgerHashPair> {
        if min > max {
            return BTreeMap::new();
        }
        let indexes = self.indexes.read();
        indexes
            .ledgers
            .range(min..=max)
            .map(|(seq, data)| {
                (
                    *seq,
                    LedgerHashPair {
                        hash: data.info.hash,
                        parent_hash: data.info.parent_hash,
                    },
                )
            })
            .collect()
    }

    fn min_ledger_seq(&self) -> Option<LedgerSeq> {
        let indexes = self.indexes.read();
        indexes.ledgers.keys().next().copied()
    }

    fn max_ledger_seq(&self) -> Option<LedgerSeq> {
        let indexes = self.indexes.read();
        indexes.ledgers.keys().next_back().copied()
    }

    fn ledger_count_min_max(&self) -> CountMinMax {
        let indexes = self.indexes.read();
        match (indexes.ledgers.keys().next(), indexes.ledgers.keys().next_back()) {
            (Some(&min_seq), Some(&max_seq)) => CountMinMax {
                count: indexes.ledgers.len(),
                min_seq,
                max_seq,
            },
            _ => CountMinMax::default(),
        }
    }

    fn transaction(&self, hash: &Hash256, range: Option<RangeInclusive<LedgerSeq>>) -> TxLookup {
        let indexes = self.indexes.read();
        if let Some(record) = indexes.txs.get(hash) {
            return TxLookup::Found(record.clone());
        }

        match range {
            Some(range) => {
                let (start, end) = (*range.start(), *range.end());
                if start > end {
                    // Empty interval: vacuously fully retained.
                    return TxLookup::NotFound(RangeCoverage::Full);
                }
                let retained = indexes.ledgers.range(start..=end).count();
                let span = (end - start) as usize + 1;
                if retained == span {
                    TxLookup::NotFound(RangeCoverage::Full)
                } else {
                    TxLookup::NotFound(RangeCoverage::Incomplete)
                }
            }
            None => TxLookup::NotFound(RangeCoverage::Unknown),
        }
    }

    fn tx_history(&self, skip: usize) -> Vec<SharedTx> {
        let indexes = self.indexes.read();
        let mut result = Vec::new();
        let mut skipped = 0;
        for data in indexes.ledgers.values().rev() {
            let mut in_ledger: Vec<&SharedTx> = data.txs.values().collect();
            in_ledger.sort_by_key(|record| record.tx_seq);
            for record in in_ledger {
                if skipped < skip {
                    skipped += 1;
                    continue;
                }
                if result.len() >= TX_HISTORY_PAGE {
                    return result;
                }
                result.push(record.clone());
            }
        }
        result
    }

    fn min_transaction_ledger_seq(&self) -> Option<LedgerSeq> {
        let indexes = self.indexes.read();
        indexes.txs.values().map(|record| record.ledger_seq).min()
    }

    fn min_account_tx_ledger_seq(&self) -> Option<LedgerSeq> {
        let indexes = self.indexes.read();
        indexes
            .accounts
            .values()
            .filter_map(|data| data.txs.keys().next().map(|(seq, _)| *seq))
            .min()
    }

    fn oldest_account_txs(&self, query: &AccountTxQuery) -> Vec<SharedTx> {
        self.scan_account(query, false)
    }

    fn newest_account_txs(&self, query: &AccountTxQuery) -> Vec<SharedTx> {
        self.scan_account(query, true)
    }

    fn oldest_account_txs_binary(&self, query: &AccountTxQuery) -> Vec<BinaryTx> {
        self.scan_account(query, false)
            .iter()
            .map(|record| binary_row(record))
            .collect()
    }

    fn newest_account_txs_binary(&self, query: &AccountTxQuery) -> Vec<BinaryTx> {
        self.scan_account(query, true)
            .iter()
            .map(|record| binary_row(record))
            .collect()
    }

    fn oldest_account_tx_page(
        &self,
        query: &AccountTxPageQuery,
    ) -> (Vec<SharedTx>, Option<TxMarker>) {
        self.page_account(query, false)
    }

    fn newest_account_tx_page(
        &self,
        query: &AccountTxPageQuery,
    ) -> (Vec<SharedTx>, Option<TxMarker>) {
        self.page_account(query, true)
    }

    fn oldest_account_tx_page_binary(
        &self,
        query: &AccountTxPageQuery,
    ) -> (Vec<BinaryTx>, Option<TxMarker>) {
        let (records, marker) = self.page_account(query, false);
        (records.iter().map(|r| binary_row(r)).collect(), marker)
    }

    fn newest_account_tx_page_binary(
        &self,
        query: &AccountTxPageQuery,
    ) -> (Vec<BinaryTx>, Option<TxMarker>) {
        let (records, marker) = self.page_account(query, true);
        (records.iter().map(|r| binary_row(r)).collect(), marker)
    }

    fn delete_transaction_by_ledger_seq(&self, seq: LedgerSeq) {
        let mut indexes = self.indexes.write();
        let removed = indexes
            .ledgers
            .get_mut(&seq)
            .map(|data| std::mem::take(&mut data.txs));
        let Some(removed) = removed else { return };

        let mut touched: BTreeSet<AccountId> = BTreeSet::new();
        for (hash, record) in &removed {
            indexes.txs.remove(hash);
            touched.extend(record.affected.iter().copied());
        }
        for account in &touched {
            let now_empty = match indexes.accounts.get_mut(account) {
                Some(data) => {
                    let keys: Vec<TxKey> = data
                        .txs
                        .range((seq, TxSeq::MIN)..=(seq, TxSeq::MAX))
                        .map(|(key, _)| *key)
                        .collect();
                    for key in keys {
                        data.txs.remove(&key);
                    }
                    data.txs.is_empty()
                }
                None => false,
            };
            if now_empty {
                indexes.accounts.remove(account);
            }
        }
    }

    fn delete_before_ledger_seq(&self, seq: LedgerSeq) {
        let mut indexes = self.indexes.write();
        let kept = indexes.ledgers.split_off(&seq);
        let removed = std::mem::replace(&mut indexes.ledgers, kept);
        for data in removed.into_values() {
            for hash in data.txs.keys() {
                indexes.txs.remove(hash);
            }
            indexes.hash_to_seq.remove(&data.info.hash);
        }
        indexes.accounts.retain(|_, data| {
            data.txs = data.txs.split_off(&(seq, TxSeq::MIN));
            !data.txs.is_empty()
        });
    }

    fn delete_transactions_before_ledger_seq(&self, seq: LedgerSeq) {
        let mut indexes = self.indexes.write();
        let seqs: Vec<LedgerSeq> = indexes.ledgers.range(..seq).map(|(s, _)| *s).collect();
        for s in seqs {
            let removed = indexes
                .ledgers
                .get_mut(&s)
                .map(|data| std::mem::take(&mut data.txs));
            if let Some(removed) = removed {
                for hash in removed.keys() {
                    indexes.txs.remove(hash);
                }
            }
        }
        indexes.accounts.retain(|_, data| {
            data.txs = data.txs.split_off(&(seq, TxSeq::MIN));
            !data.txs.is_empty()
        });
    }

    fn delete_account_transactions_before_ledger_seq(&self, seq: LedgerSeq) {
        let mut indexes = self.indexes.write();
        indexes.accounts.retain(|_, data| {
            data.txs = data.txs.split_off(&(seq, TxSeq::MIN));
            !data.txs.is_empty()
        });
    }

    fn transaction_count(&self) -> usize {
        let indexes = self.indexes.read();
        indexes.txs.len()
    }

    fn account_transaction_count(&self) -> usize {
        let indexes = self.indexes.read();
        indexes.accounts.values().map(|data| data.txs.len()).sum()
    }

    fn kb_used_all(&self) -> usize {
        let indexes = self.indexes.read();
        (size_of::<Self>() + Self::bytes_used_ledger(&indexes)
            + Self::bytes_used_transaction(&indexes))
            / 1024
    }

    fn kb_used_ledger(&self) -> usize {
        let indexes = self.indexes.read();
        Self::bytes_used_ledger(&indexes) / 1024
    }

    fn kb_used_transaction(&self) -> usize {
        let indexes = self.indexes.read();
        Self::bytes_used_transaction(&indexes) / 1024
    }
}
