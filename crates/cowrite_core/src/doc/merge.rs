//! CRDT merge operator.
//!
//! The engine treats the merge algorithm as a black box: a pure function
//! from `(snapshot, updates)` to a merged binary, commutative and idempotent
//! over its update list. [`YrsMerge`] is the production implementation,
//! backed by yrs (the Rust port of Yjs, which is what Cowrite editors
//! produce updates with).

use yrs::{Doc, ReadTxn, Transact, Update, updates::decoder::Decode};

use crate::error::Result;

/// Pure binary merge over a snapshot and a batch of updates.
///
/// Implementations must be commutative and idempotent over the update list:
/// merging the same update twice, or merging updates in any order, yields
/// the same final state. The engine relies on this to run reads concurrently
/// without coordination.
pub trait MergeOperator: Send + Sync {
    /// Fold `updates` (and the previous snapshot, if any) into a single
    /// merged binary state.
    fn merge(&self, snapshot: Option<&[u8]>, updates: &[&[u8]]) -> Result<Vec<u8>>;
}

/// Merge operator backed by a yrs document.
///
/// All binaries are applied to a fresh `Doc` and the resulting state is
/// re-encoded as a single v1 update. Undecodable or inapplicable binaries
/// are skipped with a warning rather than failing the whole merge; a
/// corrupt update must not make a document unreadable.
#[derive(Debug, Default, Clone, Copy)]
pub struct YrsMerge;

impl MergeOperator for YrsMerge {
    fn merge(&self, snapshot: Option<&[u8]>, updates: &[&[u8]]) -> Result<Vec<u8>> {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();

            if let Some(state) = snapshot {
                match Update::decode_v1(state) {
                    Ok(update) => {
                        let _ = txn.apply_update(update);
                    }
                    Err(e) => log::warn!("skipping undecodable snapshot state: {}", e),
                }
            }

            for blob in updates {
                match Update::decode_v1(blob) {
                    Ok(update) => {
                        let _ = txn.apply_update(update);
                    }
                    Err(e) => log::warn!("skipping undecodable update: {}", e),
                }
            }
        }

        let txn = doc.transact();
        Ok(txn.encode_state_as_update_v1(&Default::default()))
    }
}

/// Whether a binary encodes an empty document.
///
/// Yjs encodes the empty state either as zero bytes or as the two-byte
/// update `[0, 0]`. Empty states are never worth promoting to the snapshot
/// table.
pub fn is_empty_state(blob: &[u8]) -> bool {
    blob.is_empty() || blob == [0, 0]
}
