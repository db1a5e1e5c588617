//! Lock-free strategy: independent concurrent maps, sorted on read
//!
//! Each index is its own `DashMap`; there is no lock spanning them. A save
//! is atomic per key only, so a reader racing a save can observe one index
//! updated and a sibling not yet. Ordered queries collect a snapshot of the
//! relevant entries and sort it per query, trading read-side work for the
//! absence of a global lock.
//!
//! Guard discipline: no `DashMap` guard is ever held across an operation on
//! another map or across a removal from the same map.

use crate::config::StoreConfig;
use crate::error::Result;
use crate::hooks::NodeHooks;
use crate::store::{binary_row, make_record, validate_save, HistoryStore, TX_HISTORY_PAGE};
use crate::types::{
    AccountId, AccountTxPageQuery, AccountTxQuery, BinaryTx, CountMinMax, Hash256,
    LedgerHashPair, LedgerInfo, LedgerSeq, RangeCoverage, SharedTx, TxLookup, TxMarker, TxSeq,
    ValidatedLedger,
};
use dashmap::DashMap;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::mem::size_of;
use std::ops::RangeInclusive;
use std::sync::Arc;

type TxKey = (LedgerSeq, TxSeq);

struct LedgerData {
    info: LedgerInfo,
    txs: HashMap<Hash256, SharedTx>,
}

/// History store backed by independent concurrent maps
pub struct ConcurrentStore {
    config: StoreConfig,
    hooks: Arc<dyn NodeHooks>,
    ledgers: DashMap<LedgerSeq, LedgerData>,
    hash_to_seq: DashMap<Hash256, LedgerSeq>,
    txs: DashMap<Hash256, SharedTx>,
    accounts: DashMap<AccountId, HashMap<TxKey, SharedTx>>,
}

impl fmt::Debug for ConcurrentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConcurrentStore {
    /// Create an empty store
    pub fn new(config: StoreConfig, hooks: Arc<dyn NodeHooks>) -> Self {
        Self {
            config,
            hooks,
            ledgers: DashMap::new(),
            hash_to_seq: DashMap::new(),
            txs: DashMap::new(),
            accounts: DashMap::new(),
        }
    }

    /// Amortized removal of ledgers below the retention cutoff.
    fn evict(&self, tip: LedgerSeq) {
        let cutoff = tip.saturating_sub(self.config.history_window);
        if cutoff == 0 {
            return;
        }

        let mut batch: Vec<LedgerSeq> = self
            .ledgers
            .iter()
            .map(|entry| *entry.key())
            .filter(|seq| *seq < cutoff)
            .collect();
        if batch.is_empty() {
            return;
        }
        batch.sort_unstable();
        batch.truncate(self.config.eviction_batch);

        let mut touched: BTreeSet<AccountId> = BTreeSet::new();
        let mut last_removed = 0;
        let removed = batch.len();
        for seq in batch {
            if let Some((_, data)) = self.ledgers.remove(&seq) {
                for (hash, record) in &data.txs {
                    self.txs.remove(hash);
                    touched.extend(record.affected.iter().copied());
                }
                self.hash_to_seq.remove(&data.info.hash);
                last_removed = seq;
            }
        }

        // Account entries are pruned only up to the largest sequence actually
        // evicted, matching the ledger table.
        for account in &touched {
            if let Some(mut entry) = self.accounts.get_mut(account) {
                entry.retain(|key, _| key.0 > last_removed);
            }
            self.accounts.remove_if(account, |_, txs| txs.is_empty());
        }

        tracing::debug!(cutoff, removed, "evicted ledger batch");
        self.hooks.clear_prior_ledgers(cutoff);
    }

    /// Snapshot of one account's entries within the ledger range, ascending
    /// by `(ledger_seq, tx_seq)`.
    fn account_snapshot(
        &self,
        account: &AccountId,
        min_ledger: LedgerSeq,
        max_ledger: LedgerSeq,
    ) -> Vec<(TxKey, SharedTx)> {
        let Some(entry) = self.accounts.get(account) else {
            return Vec::new();
        };
        let mut snapshot: Vec<(TxKey, SharedTx)> = entry
            .iter()
            .filter(|(key, _)| key.0 >= min_ledger && key.0 <= max_ledger)
            .map(|(key, record)| (*key, record.clone()))
            .collect();
        drop(entry);
        snapshot.sort_unstable_by_key(|(key, _)| *key);
        snapshot
    }

    fn scan_account(&self, query: &AccountTxQuery, newest: bool) -> Vec<SharedTx> {
        if !query.unlimited && query.limit == 0 {
            return Vec::new();
        }
        if query.min_ledger > query.max_ledger {
            return Vec::new();
        }

        let snapshot = self.account_snapshot(&query.account, query.min_ledger, query.max_ledger);
        let take = if query.unlimited { usize::MAX } else { query.limit };
        if newest {
            // Offset and limit consume the descending walk; the page is then
            // reversed so callers always see ascending order.
            let mut result: Vec<SharedTx> = snapshot
                .iter()
                .rev()
                .skip(query.offset)
                .take(take)
                .map(|(_, record)| record.clone())
                .collect();
            result.reverse();
            result
        } else {
            snapshot
                .iter()
                .skip(query.offset)
                .take(take)
                .map(|(_, record)| record.clone())
                .collect()
        }
    }

    /// Cursor-paged scan over a sorted snapshot. The marker resumes strictly
    /// after its key; a vanished marker lands on the next remaining key in
    /// scan direction via the partition point.
    fn page_account(
        &self,
        query: &AccountTxPageQuery,
        newest: bool,
    ) -> (Vec<SharedTx>, Option<TxMarker>) {
        if query.min_ledger > query.max_ledger {
            return (Vec::new(), None);
        }

        let snapshot = self.account_snapshot(&query.account, query.min_ledger, query.max_ledger);
        let limit = if query.limit == 0 { usize::MAX } else { query.limit };

        let mut result = Vec::new();
        let mut marker = None;
        let mut emit = |iter: &mut dyn Iterator<Item = &(TxKey, SharedTx)>| {
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
        };

        if newest {
            let end = match query.marker {
                Some(m) => snapshot.partition_point(|(key, _)| *key < m.key()),
                None => snapshot.len(),
            };
            emit(&mut snapshot[..end].iter().rev());
        } else {
            let start = match query.marker {
                Some(m) => snapshot.partition_point(|(key, _)| *key <= m.key()),
                None => 0,
            };
            emit(&mut snapshot[start..].iter());
        }
        (result, marker)
    }

    fn bytes_used_ledger(&self) -> usize {
        let mut size = self.ledgers.len() * (size_of::<LedgerSeq>() + size_of::<LedgerData>());
        size += self.hash_to_seq.len() * (size_of::<Hash256>() + size_of::<LedgerSeq>());
        size
    }

    fn bytes_used_transaction(&self) -> usize {
        let mut size = 0;
        for entry in self.txs.iter() {
            size += size_of::<Hash256>() + size_of::<crate::types::TxRecord>();
            size += entry.tx_blob.len() + entry.meta_blob.len();
        }
        for entry in self.accounts.iter() {
            size += size_of::<AccountId>();
            size += entry.len() * (size_of::<TxKey>() + size_of::<SharedTx>());
        }
        size
    }
}

impl HistoryStore for ConcurrentStore {
    fn save_validated_ledger(&self, ledger: &ValidatedLedger, current: bool) -> Result<()> {
        let txs = validate_save(ledger, self.hooks.as_ref())?;
        let info = &ledger.info;
        tracing::trace!(seq = info.seq, current, "save_validated_ledger");

        let mut data = LedgerData {
            info: info.clone(),
            txs: HashMap::with_capacity(txs.len()),
        };
        for tx in txs {
            let record = make_record(info.seq, tx);
            data.txs.insert(tx.hash, record.clone());
            self.txs.insert(tx.hash, record.clone());
            for account in &tx.affected {
                self.accounts
                    .entry(*account)
                    .or_default()
                    .insert((info.seq, tx.tx_seq), record.clone());
            }
        }
        self.ledgers.insert(info.seq, data);
        self.hash_to_seq.insert(info.hash, info.seq);

        if current {
            self.evict(info.seq);
        }
        Ok(())
    }

    fn ledger_info_by_seq(&self, seq: LedgerSeq) -> Option<LedgerInfo> {
        self.ledgers.get(&seq).map(|data| data.info.clone())
    }

    fn ledger_info_by_hash(&self, hash: &Hash256) -> Option<LedgerInfo> {
        let seq = *self.hash_to_seq.get(hash)?;
        self.ledgers.get(&seq).map(|data| data.info.clone())
    }

    fn newest_ledger_info(&self) -> Option<LedgerInfo> {
        let seq = self.max_ledger_seq()?;
        self.ledgers.get(&seq).map(|data| data.info.clone())
    }

    fn oldest_ledger_info(&self) -> Option<LedgerInfo> {
        let seq = self.min_ledger_seq()?;
        self.ledgers.get(&seq).map(|data| data.info.clone())
    }

    fn limited_oldest_ledger_info(&self, first: LedgerSeq) -> Option<LedgerInfo> {
        let seq = self
            .ledgers
            .iter()
            .map(|entry| *entry.key())
            .filter(|seq| *seq >= first)
            .min()?;
        self.ledgers.get(&seq).map(|data| data.info.clone())
    }

    fn limited_newest_ledger_info(&self, first: LedgerSeq) -> Option<LedgerInfo> {
        let seq = self.max_ledger_seq()?;
        if seq < first {
            return None;
        }
        self.ledgers.get(&seq).map(|data| data.info.clone())
    }

    fn ledger_hashes(&self, seq: LedgerSeq) -> Option<LedgerHashPair> {
        self.ledgers.get(&seq).map(|data| LedgerHashPair {
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
        self.ledgers
            .iter()
            .filter(|entry| (min..=max).contains(entry.key()))
            .map(|entry| {
                (
                    *entry.key(),
                    LedgerHashPair {
                        hash: entry.info.hash,
                        parent_hash: entry.info.parent_hash,
                    },
                )
            })
            .collect()
    }

    fn min_ledger_seq(&self) -> Option<LedgerSeq> {
        self.ledgers.iter().map(|entry| *entry.key()).min()
    }

    fn max_ledger_seq(&self) -> Option<LedgerSeq> {
        self.ledgers.iter().map(|entry| *entry.key()).max()
    }

    fn ledger_count_min_max(&self) -> CountMinMax {
        let mut count = 0;
        let mut min_seq = LedgerSeq::MAX;
        let mut max_seq = LedgerSeq::MIN;
        for entry in self.ledgers.iter() {
            count += 1;
            min_seq = min_seq.min(*entry.key());
            max_seq = max_seq.max(*entry.key());
        }
        if count == 0 {
            return CountMinMax::default();
        }
        CountMinMax {
            count,
            min_seq,
            max_seq,
        }
    }

    fn transaction(&self, hash: &Hash256, range: Option<RangeInclusive<LedgerSeq>>) -> TxLookup {
        if let Some(record) = self.txs.get(hash) {
            return TxLookup::Found(record.clone());
        }

        match range {
            Some(range) => {
                let (start, end) = (*range.start(), *range.end());
                if start > end {
                    return TxLookup::NotFound(RangeCoverage::Full);
                }
                let retained = self
                    .ledgers
                    .iter()
                    .filter(|entry| (start..=end).contains(entry.key()))
                    .count();
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
        let mut snapshot: Vec<SharedTx> = self.txs.iter().map(|entry| entry.value().clone()).collect();
        snapshot.sort_unstable_by_key(|record| (Reverse(record.ledger_seq), record.tx_seq));
        snapshot.into_iter().skip(skip).take(TX_HISTORY_PAGE).collect()
    }

    fn min_transaction_ledger_seq(&self) -> Option<LedgerSeq> {
        self.txs.iter().map(|entry| entry.ledger_seq).min()
    }

    fn min_account_tx_ledger_seq(&self) -> Option<LedgerSeq> {
        self.accounts
            .iter()
            .filter_map(|entry| entry.keys().map(|(seq, _)| *seq).min())
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
        let removed = match self.ledgers.get_mut(&seq) {
            Some(mut data) => std::mem::take(&mut data.txs),
            None => return,
        };

        let mut touched: BTreeSet<AccountId> = BTreeSet::new();
        for (hash, record) in &removed {
            self.txs.remove(hash);
            touched.extend(record.affected.iter().copied());
        }
        for account in &touched {
            if let Some(mut entry) = self.accounts.get_mut(account) {
                entry.retain(|key, _| key.0 != seq);
            }
            self.accounts.remove_if(account, |_, txs| txs.is_empty());
        }
    }

    fn delete_before_ledger_seq(&self, seq: LedgerSeq) {
        let mut doomed: Vec<LedgerSeq> = self
            .ledgers
            .iter()
            .map(|entry| *entry.key())
            .filter(|s| *s < seq)
            .collect();
        doomed.sort_unstable();
        for s in doomed {
            if let Some((_, data)) = self.ledgers.remove(&s) {
                for hash in data.txs.keys() {
                    self.txs.remove(hash);
                }
                self.hash_to_seq.remove(&data.info.hash);
            }
        }
        self.accounts.retain(|_, txs| {
            txs.retain(|key, _| key.0 >= seq);
            !txs.is_empty()
        });
    }

    fn delete_transactions_before_ledger_seq(&self, seq: LedgerSeq) {
        let doomed: Vec<LedgerSeq> = self
            .ledgers
            .iter()
            .map(|entry| *entry.key())
            .filter(|s| *s < seq)
            .collect();
        for s in doomed {
            let removed = match self.ledgers.get_mut(&s) {
                Some(mut data) => std::mem::take(&mut data.txs),
                None => continue,
            };
            for hash in removed.keys() {
                self.txs.remove(hash);
            }
        }
        self.accounts.retain(|_, txs| {
            txs.retain(|key, _| key.0 >= seq);
            !txs.is_empty()
        });
    }

    fn delete_account_transactions_before_ledger_seq(&self, seq: LedgerSeq) {
        self.accounts.retain(|_, txs| {
            txs.retain(|key, _| key.0 >= seq);
            !txs.is_empty()
        });
    }

    fn transaction_count(&self) -> usize {
        self.txs.len()
    }

    fn account_transaction_count(&self) -> usize {
        self.accounts.iter().map(|entry| entry.len()).sum()
    }

    fn kb_used_all(&self) -> usize {
        (size_of::<Self>() + self.bytes_used_ledger() + self.bytes_used_transaction()) / 1024
    }

    fn kb_used_ledger(&self) -> usize {
        self.bytes_used_ledger() / 1024
    }

    fn kb_used_transaction(&self) -> usize {
        self.bytes_used_transaction() / 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NullHooks;
    use crate::types::AcceptedTx;
    use bytes::Bytes;
    use chrono::Utc;

    fn account(tag: u8) -> AccountId {
        AccountId::new([tag; 20])
    }

    fn accepted_tx(seq: LedgerSeq, tx_seq: TxSeq, affected: Vec<AccountId>) -> AcceptedTx {
        AcceptedTx {
            hash: Hash256::digest(format!("tx-{}-{}", seq, tx_seq)),
            tx_blob: Bytes::from(format!("blob-{}-{}", seq, tx_seq)),
            meta_blob: Bytes::from(format!("meta-{}-{}", seq, tx_seq)),
            tx_seq,
            affected,
        }
    }

    fn ledger(seq: LedgerSeq, txs: Vec<AcceptedTx>) -> ValidatedLedger {
        let state_hash = Hash256::digest(format!("state-{}", seq));
        ValidatedLedger {
            info: LedgerInfo {
                seq,
                hash: Hash256::digest(format!("ledger-{}", seq)),
                parent_hash: Hash256::digest(format!("ledger-{}", seq.wrapping_sub(1))),
                account_hash: state_hash,
                tx_hash: crate::types::tx_set_hash(&txs),
                close_time: Utc::now(),
            },
            state_hash,
            transactions: Some(txs),
        }
    }

    fn store(history_window: u32, eviction_batch: usize) -> ConcurrentStore {
        let config = StoreConfig {
            history_window,
            eviction_batch,
            strategy: crate::config::Strategy::LockFree,
        };
        ConcurrentStore::new(config, Arc::new(NullHooks))
    }

    #[test]
    fn test_save_and_lookup() {
        let store = store(100, 128);
        let tx = accepted_tx(7, 0, vec![account(1)]);
        let tx_hash = tx.hash;
        let ledger = ledger(7, vec![tx]);

        store.save_validated_ledger(&ledger, true).unwrap();

        assert_eq!(store.ledger_info_by_seq(7).unwrap().hash, ledger.info.hash);
        assert_eq!(store.ledger_info_by_hash(&ledger.info.hash).unwrap().seq, 7);
        assert!(matches!(store.transaction(&tx_hash, None), TxLookup::Found(_)));
    }

    #[test]
    fn test_newest_page_is_descending() {
        let store = store(100, 128);
        for seq in [3u32, 1, 2] {
            let tx = accepted_tx(seq, 0, vec![account(5)]);
            store.save_validated_ledger(&ledger(seq, vec![tx]), false).unwrap();
        }

        let (page, marker) = store.newest_account_tx_page(&AccountTxPageQuery {
            account: account(5),
            min_ledger: 0,
            max_ledger: 10,
            marker: None,
            limit: 2,
        });
        let seqs: Vec<LedgerSeq> = page.iter().map(|r| r.ledger_seq).collect();
        assert_eq!(seqs, vec![3, 2]);

        let (page, marker) = store.newest_account_tx_page(&AccountTxPageQuery {
            account: account(5),
            min_ledger: 0,
            max_ledger: 10,
            marker,
            limit: 2,
        });
        let seqs: Vec<LedgerSeq> = page.iter().map(|r| r.ledger_seq).collect();
        assert_eq!(seqs, vec![1]);
        assert!(marker.is_none());
    }

    #[test]
    fn test_range_classification() {
        let store = store(100, 128);
        for seq in [10u32, 11, 12] {
            let tx = accepted_tx(seq, 0, vec![account(2)]);
            store.save_validated_ledger(&ledger(seq, vec![tx]), false).unwrap();
        }

        let absent = Hash256::digest(b"not-saved");
        assert!(matches!(
            store.transaction(&absent, Some(10..=12)),
            TxLookup::NotFound(RangeCoverage::Full)
        ));
        assert!(matches!(
            store.transaction(&absent, Some(9..=12)),
            TxLookup::NotFound(RangeCoverage::Incomplete)
        ));
        assert!(matches!(
            store.transaction(&absent, None),
            TxLookup::NotFound(RangeCoverage::Unknown)
        ));
    }

    #[test]
    fn test_eviction_prunes_all_indexes() {
        let store = store(2, 128);
        let mut first_hashes = Vec::new();
        for seq in 1..=10 {
            let tx = accepted_tx(seq, 0, vec![account(4)]);
            first_hashes.push((seq, tx.hash, ledger(seq, vec![tx.clone()]).info.hash));
            let tx = accepted_tx(seq, 0, vec![account(4)]);
            store.save_validated_ledger(&ledger(seq, vec![tx]), true).unwrap();
        }

        // Window 2 behind tip 10: ledgers below 8 are gone from every index.
        assert_eq!(store.min_ledger_seq().unwrap(), 8);
        let counts = store.ledger_count_min_max();
        assert_eq!((counts.count, counts.min_seq, counts.max_seq), (3, 8, 10));
        assert_eq!(store.transaction_count(), 3);
        assert_eq!(store.account_transaction_count(), 3);
        assert_eq!(store.min_account_tx_ledger_seq(), Some(8));
        for (seq, tx_hash, ledger_hash) in first_hashes.iter().take(7) {
            assert!(store.ledger_info_by_seq(*seq).is_none());
            assert!(store.ledger_info_by_hash(ledger_hash).is_none());
            assert!(matches!(
                store.transaction(tx_hash, None),
                TxLookup::NotFound(_)
            ));
        }
    }

    #[test]
    fn test_tx_history_newest_first() {
        let store = store(100, 128);
        for seq in 1..=5u32 {
            let txs = vec![
                accepted_tx(seq, 0, vec![account(1)]),
                accepted_tx(seq, 1, vec![account(1)]),
            ];
            store.save_validated_ledger(&ledger(seq, txs), false).unwrap();
        }

        let history = store.tx_history(0);
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].ledger_seq, 5);
        assert_eq!(history[0].tx_seq, 0);
        assert_eq!(history[1].tx_seq, 1);
        assert_eq!(history[9].ledger_seq, 1);

        let skipped = store.tx_history(8);
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].ledger_seq, 1);
    }
}
