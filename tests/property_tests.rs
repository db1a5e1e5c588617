//! Property-based tests for the history store

use bytes::Bytes;
use chrono::Utc;
use ledger_hotstore::{
    open, tx_set_hash, AcceptedTx, AccountId, AccountTxPageQuery, AccountTxQuery, Hash256,
    HistoryStore, LedgerInfo, LedgerSeq, NullHooks, RangeCoverage, StoreConfig, Strategy,
    TxLookup, TxSeq, ValidatedLedger,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

const ACCOUNT: AccountId = AccountId::new([0x42; 20]);

fn ledger_for(seq: LedgerSeq, tx_count: usize) -> ValidatedLedger {
    let txs: Vec<AcceptedTx> = (0..tx_count as TxSeq)
        .map(|tx_seq| AcceptedTx {
            hash: Hash256::digest(format!("tx-{}-{}", seq, tx_seq)),
            tx_blob: Bytes::from(format!("blob-{}-{}", seq, tx_seq)),
            meta_blob: Bytes::from(format!("meta-{}-{}", seq, tx_seq)),
            tx_seq,
            affected: vec![ACCOUNT],
        })
        .collect();
    let state_hash = Hash256::digest(format!("state-{}", seq));
    ValidatedLedger {
        info: LedgerInfo {
            seq,
            hash: Hash256::digest(format!("ledger-{}", seq)),
            parent_hash: Hash256::digest(format!("ledger-{}", seq.wrapping_sub(1))),
            account_hash: state_hash,
            tx_hash: tx_set_hash(&txs),
            close_time: Utc::now(),
        },
        state_hash,
        transactions: Some(txs),
    }
}

fn stores() -> Vec<Arc<dyn HistoryStore>> {
    [Strategy::CoarseLock, Strategy::LockFree]
        .into_iter()
        .map(|strategy| {
            let config = StoreConfig {
                history_window: 1000,
                eviction_batch: 128,
                strategy,
            };
            open(config, Arc::new(NullHooks)).unwrap()
        })
        .collect()
}

fn populate(store: &dyn HistoryStore, seqs: &BTreeSet<LedgerSeq>, txs_per_ledger: usize) {
    for &seq in seqs {
        store
            .save_validated_ledger(&ledger_for(seq, txs_per_ledger), false)
            .unwrap();
    }
}

fn all_keys(store: &dyn HistoryStore) -> Vec<(LedgerSeq, TxSeq)> {
    store
        .oldest_account_txs(&AccountTxQuery {
            account: ACCOUNT,
            min_ledger: 0,
            max_ledger: LedgerSeq::MAX,
            offset: 0,
            limit: 0,
            unlimited: true,
        })
        .iter()
        .map(|r| (r.ledger_seq, r.tx_seq))
        .collect()
}

proptest! {
    /// Walking pages of any size visits exactly the unpaged ascending result,
    /// in order, with no duplicates.
    #[test]
    fn prop_pagination_is_complete(
        seqs in prop::collection::btree_set(1u32..500, 1..40),
        txs_per_ledger in 1usize..4,
        page_size in 1usize..10,
    ) {
        for store in stores() {
            populate(store.as_ref(), &seqs, txs_per_ledger);
            let expected = all_keys(store.as_ref());

            let mut walked = Vec::new();
            let mut marker = None;
            loop {
                let (page, next) = store.oldest_account_tx_page(&AccountTxPageQuery {
                    account: ACCOUNT,
                    min_ledger: 0,
                    max_ledger: LedgerSeq::MAX,
                    marker,
                    limit: page_size,
                });
                walked.extend(page.iter().map(|r| (r.ledger_seq, r.tx_seq)));
                match next {
                    Some(m) => marker = Some(m),
                    None => break,
                }
            }
            prop_assert_eq!(walked, expected);
        }
    }

    /// The k newest transactions are exactly the tail of the full ascending
    /// scan, still in ascending order.
    #[test]
    fn prop_newest_is_oldest_tail(
        seqs in prop::collection::btree_set(1u32..500, 1..40),
        k in 1usize..30,
    ) {
        for store in stores() {
            populate(store.as_ref(), &seqs, 2);

            let all = all_keys(store.as_ref());
            let newest: Vec<(LedgerSeq, TxSeq)> = store
                .newest_account_txs(&AccountTxQuery {
                    account: ACCOUNT,
                    min_ledger: 0,
                    max_ledger: LedgerSeq::MAX,
                    offset: 0,
                    limit: k,
                    unlimited: false,
                })
                .iter()
                .map(|r| (r.ledger_seq, r.tx_seq))
                .collect();

            let tail_len = k.min(all.len());
            let expected: Vec<_> = all[all.len() - tail_len..].to_vec();
            prop_assert_eq!(newest, expected);
        }
    }

    /// After any run of current-ledger saves the retained window stays within
    /// one eviction batch of the cutoff, and all indexes agree on membership.
    #[test]
    fn prop_retention_within_one_batch_of_cutoff(
        tip in 20u32..300,
        window in 1u32..50,
        batch in 1usize..20,
    ) {
        for strategy in [Strategy::CoarseLock, Strategy::LockFree] {
            let config = StoreConfig {
                history_window: window,
                eviction_batch: batch,
                strategy,
            };
            let store = open(config, Arc::new(NullHooks)).unwrap();
            for seq in 1..=tip {
                store.save_validated_ledger(&ledger_for(seq, 1), true).unwrap();
            }

            let cutoff = tip.saturating_sub(window);
            let min = store.min_ledger_seq().unwrap();
            // Everything at or above the cutoff survives.
            prop_assert!(min <= cutoff.max(1));
            prop_assert_eq!(store.max_ledger_seq(), Some(tip));

            // Eviction may lag by at most one batch of sequences.
            let retained = store.ledger_count_min_max().count as u32;
            let window_size = tip - min + 1;
            prop_assert_eq!(retained, window_size);
            prop_assert!(window_size <= window + 1 + batch as u32);

            // Cross-index agreement.
            let keys = all_keys(store.as_ref());
            prop_assert_eq!(keys.len(), retained as usize);
            prop_assert_eq!(keys.first().map(|(seq, _)| *seq), Some(min));
            prop_assert_eq!(store.transaction_count(), retained as usize);
            prop_assert_eq!(store.min_transaction_ledger_seq(), Some(min));
            prop_assert_eq!(store.min_account_tx_ledger_seq(), Some(min));
        }
    }

    /// Range classification of a missing transaction matches a reference
    /// computation over the retained set.
    #[test]
    fn prop_range_classification_matches_reference(
        seqs in prop::collection::btree_set(1u32..100, 1..30),
        start in 1u32..100,
        len in 0u32..30,
    ) {
        let end = start.saturating_add(len);
        for store in stores() {
            populate(store.as_ref(), &seqs, 0);

            let expected = if (start..=end).all(|seq| seqs.contains(&seq)) {
                RangeCoverage::Full
            } else {
                RangeCoverage::Incomplete
            };

            let absent = Hash256::digest(b"never-saved");
            match store.transaction(&absent, Some(start..=end)) {
                TxLookup::NotFound(coverage) => prop_assert_eq!(coverage, expected),
                TxLookup::Found(_) => prop_assert!(false, "phantom transaction"),
            }
        }
    }

    /// Resuming from any marker, present in the index or not, yields exactly
    /// the keys strictly greater than the marker.
    #[test]
    fn prop_marker_resume_is_strictly_after(
        seqs in prop::collection::btree_set(1u32..200, 1..30),
        marker_seq in 0u32..210,
        marker_tx in 0u32..3,
    ) {
        for store in stores() {
            populate(store.as_ref(), &seqs, 2);

            let marker = ledger_hotstore::TxMarker {
                ledger_seq: marker_seq,
                tx_seq: marker_tx,
            };
            let (page, _) = store.oldest_account_tx_page(&AccountTxPageQuery {
                account: ACCOUNT,
                min_ledger: 0,
                max_ledger: LedgerSeq::MAX,
                marker: Some(marker),
                limit: 0,
            });

            let expected: Vec<(LedgerSeq, TxSeq)> = all_keys(store.as_ref())
                .into_iter()
                .filter(|key| *key > marker.key())
                .collect();
            let got: Vec<(LedgerSeq, TxSeq)> =
                page.iter().map(|r| (r.ledger_seq, r.tx_seq)).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
