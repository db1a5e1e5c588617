//! Outbound collaborator interface
//!
//! The store owns its indexes exclusively; everything it needs to tell the
//! rest of the node flows through [`NodeHooks`]. Implementations must not
//! call back into the store: `clear_prior_ledgers` fires while the
//! coarse-lock strategy still holds its write lock.

use crate::types::{Hash256, LedgerSeq};

/// Callbacks from the store to its node-level collaborators
pub trait NodeHooks: Send + Sync {
    /// The retention cutoff advanced; history below `cutoff` is gone.
    fn clear_prior_ledgers(&self, cutoff: LedgerSeq) {
        let _ = cutoff;
    }

    /// Saving the ledger at `seq` failed; the caller may retry once the
    /// missing data is available.
    fn failed_save(&self, seq: LedgerSeq, hash: Hash256) {
        let _ = (seq, hash);
    }

    /// Waiters blocked on the save of `seq` can proceed; the store's answer
    /// for that sequence is now authoritative.
    fn finish_work(&self, seq: LedgerSeq) {
        let _ = seq;
    }

    /// A paged account query referenced a ledger that may not be durably
    /// recorded elsewhere yet.
    fn unsaved_ledger(&self, seq: LedgerSeq) {
        let _ = seq;
    }
}

/// Hooks implementation that ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHooks;

impl NodeHooks for NullHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_hooks_are_noops() {
        let hooks = NullHooks;
        hooks.clear_prior_ledgers(10);
        hooks.failed_save(11, Hash256::ZERO);
        hooks.finish_work(11);
        hooks.unsaved_ledger(12);
    }
}
