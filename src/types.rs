//! Core types for the history store
//!
//! All types are immutable once created; the store hands them across its
//! boundary by value or behind `Arc`, never by internal reference.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Position of a validated ledger in the chain.
pub type LedgerSeq = u32;

/// Position of a transaction within its ledger.
pub type TxSeq = u32;

/// 32-byte content hash (ledger hash, transaction id, state root).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Create from raw bytes
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether every byte is zero
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// SHA-256 of arbitrary input
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data.as_ref());
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

/// 20-byte account identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId([u8; 20]);

impl AccountId {
    /// Create from raw bytes
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self)
    }
}

/// Header of a validated ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerInfo {
    /// Ledger sequence (chain position)
    pub seq: LedgerSeq,

    /// Hash of this ledger
    pub hash: Hash256,

    /// Hash of the parent ledger
    pub parent_hash: Hash256,

    /// Root of the account state tree as declared by consensus
    pub account_hash: Hash256,

    /// Commitment over the transaction set (see [`tx_set_hash`])
    pub tx_hash: Hash256,

    /// Consensus close time
    pub close_time: DateTime<Utc>,
}

/// Hash and parent hash of a retained ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHashPair {
    /// Ledger hash
    pub hash: Hash256,
    /// Parent ledger hash
    pub parent_hash: Hash256,
}

/// A validated transaction as retained by the store
///
/// Referenced simultaneously from the ledger table, the global transaction
/// index, and every affected account's index via [`SharedTx`]; the record is
/// freed when the last index entry referencing it is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    /// Global transaction id
    pub hash: Hash256,

    /// Serialized transaction body
    pub tx_blob: Bytes,

    /// Serialized transaction metadata
    pub meta_blob: Bytes,

    /// Sequence of the ledger containing this transaction
    pub ledger_seq: LedgerSeq,

    /// Position within that ledger
    pub tx_seq: TxSeq,

    /// Accounts whose state this transaction touched
    pub affected: Vec<AccountId>,
}

/// Shared handle to a retained transaction record
pub type SharedTx = Arc<TxRecord>;

/// Per-transaction input to [`save_validated_ledger`]
///
/// [`save_validated_ledger`]: crate::HistoryStore::save_validated_ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedTx {
    /// Global transaction id
    pub hash: Hash256,
    /// Serialized transaction body
    pub tx_blob: Bytes,
    /// Serialized transaction metadata
    pub meta_blob: Bytes,
    /// Position within the ledger
    pub tx_seq: TxSeq,
    /// Accounts whose state this transaction touched
    pub affected: Vec<AccountId>,
}

/// A consensus-validated ledger submitted for saving
#[derive(Debug, Clone)]
pub struct ValidatedLedger {
    /// Ledger header
    pub info: LedgerInfo,

    /// Account-state root reported by the state tree for this ledger
    pub state_hash: Hash256,

    /// Accepted transactions in ledger order; `None` when the node store
    /// could not supply every transaction body
    pub transactions: Option<Vec<AcceptedTx>>,
}

/// Commitment over a transaction set: SHA-256 of `(tx_seq, tx_hash)` pairs
/// in `tx_seq` order. A valid ledger declares `info.tx_hash` equal to this.
pub fn tx_set_hash(txs: &[AcceptedTx]) -> Hash256 {
    let mut ordered: Vec<(TxSeq, &Hash256)> =
        txs.iter().map(|tx| (tx.tx_seq, &tx.hash)).collect();
    ordered.sort_by_key(|(seq, _)| *seq);

    let mut hasher = Sha256::new();
    for (seq, hash) in ordered {
        hasher.update(seq.to_be_bytes());
        hasher.update(hash.as_bytes());
    }
    Hash256::new(hasher.finalize().into())
}

/// Pagination cursor for account transaction queries
///
/// Compares lexicographically by `(ledger_seq, tx_seq)`; this pair is the
/// only legal resume point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxMarker {
    /// Ledger sequence of the last returned transaction
    pub ledger_seq: LedgerSeq,
    /// Position of that transaction within its ledger
    pub tx_seq: TxSeq,
}

impl TxMarker {
    /// The `(ledger_seq, tx_seq)` ordering key
    pub fn key(&self) -> (LedgerSeq, TxSeq) {
        (self.ledger_seq, self.tx_seq)
    }
}

/// Serialized row returned by the binary account transaction queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryTx {
    /// Serialized transaction body
    pub tx_blob: Bytes,
    /// Serialized transaction metadata
    pub meta_blob: Bytes,
    /// Sequence of the containing ledger
    pub ledger_seq: LedgerSeq,
}

/// Options for the unpaged account transaction queries
#[derive(Debug, Clone)]
pub struct AccountTxQuery {
    /// Account whose transactions to return
    pub account: AccountId,
    /// Smallest ledger sequence to include
    pub min_ledger: LedgerSeq,
    /// Largest ledger sequence to include
    pub max_ledger: LedgerSeq,
    /// Matching entries to skip before collecting
    pub offset: usize,
    /// Maximum entries to return (ignored when `unlimited`)
    pub limit: usize,
    /// Return every match regardless of `limit`
    pub unlimited: bool,
}

/// Options for the paged account transaction queries
#[derive(Debug, Clone)]
pub struct AccountTxPageQuery {
    /// Account whose transactions to return
    pub account: AccountId,
    /// Smallest ledger sequence to include
    pub min_ledger: LedgerSeq,
    /// Largest ledger sequence to include
    pub max_ledger: LedgerSeq,
    /// Resume strictly after this key; `None` starts from the boundary
    pub marker: Option<TxMarker>,
    /// Page size; `0` means unlimited
    pub limit: usize,
}

/// Result of a global transaction lookup
#[derive(Debug, Clone)]
pub enum TxLookup {
    /// The transaction is retained
    Found(SharedTx),
    /// Not retained; how conclusive that is depends on range coverage
    NotFound(RangeCoverage),
}

/// How much of a queried ledger range the store retains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeCoverage {
    /// Every sequence in the range has a ledger record; the transaction
    /// definitively does not exist in that range
    Full,
    /// Some sequence in the range is not retained; absence is inconclusive
    Incomplete,
    /// No range was given
    Unknown,
}

/// Ledger count and sequence bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountMinMax {
    /// Number of retained ledgers
    pub count: usize,
    /// Smallest retained sequence (0 when empty)
    pub min_seq: LedgerSeq,
    /// Largest retained sequence (0 when empty)
    pub max_seq: LedgerSeq,
}
