//! Storage abstraction for document persistence.
//!
//! This module defines the store traits which abstract over different
//! storage backends (SQLite, in-memory) for the update log and the snapshot
//! table. The engine only ever talks to [`DocStore`].

use std::collections::HashMap;

use super::types::{DocSnapshot, DocUpdate};
use crate::error::CowriteError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, CowriteError>;

/// Append-only per-document update log.
///
/// # Ordering
///
/// `seq` is assigned by the store at insert time and is strictly increasing
/// per `(workspace_id, doc_id)`, across the whole lifetime of the document —
/// including after consumed updates have been deleted. Allocation must go
/// through the store's transactional write path (multiple service instances
/// write concurrently), never a process-local counter.
pub trait UpdateLogStore: Send + Sync {
    /// Append one update row. Either fully commits or fails; no partial
    /// writes. Errors propagate unmodified — retry lives in the engine.
    ///
    /// Returns the assigned sequence number.
    fn append_update(
        &self,
        workspace_id: &str,
        doc_id: &str,
        blob: &[u8],
        created_by: Option<&str>,
    ) -> StoreResult<i64>;

    /// List all updates with `seq > after_seq`, ascending by seq.
    fn updates_since(
        &self,
        workspace_id: &str,
        doc_id: &str,
        after_seq: i64,
    ) -> StoreResult<Vec<DocUpdate>>;

    /// Delete the given update rows.
    ///
    /// Deleting already-deleted rows is a no-op, not an error; concurrent
    /// compactions may race on the same set. Returns the number of rows
    /// actually removed.
    fn delete_updates(&self, workspace_id: &str, doc_id: &str, seqs: &[i64]) -> StoreResult<usize>;
}

/// At most one merged-state row per document.
pub trait SnapshotStore: Send + Sync {
    /// Load the current snapshot, or `None` for a document that has never
    /// been compacted.
    fn snapshot(&self, workspace_id: &str, doc_id: &str) -> StoreResult<Option<DocSnapshot>>;

    /// Write the snapshot row, overwriting unconditionally.
    ///
    /// The monotonic `updated_at` check is the engine's responsibility, not
    /// the store's.
    fn set_snapshot(
        &self,
        workspace_id: &str,
        doc_id: &str,
        blob: &[u8],
        seq: i64,
        updated_at: i64,
    ) -> StoreResult<()>;
}

/// Full storage surface the engine orchestrates: both tables plus cascade
/// deletion and workspace-wide timestamp queries.
pub trait DocStore: UpdateLogStore + SnapshotStore {
    /// Delete a document's snapshot and all of its update rows.
    ///
    /// Deleting a document that does not exist is a no-op.
    fn delete_doc(&self, workspace_id: &str, doc_id: &str) -> StoreResult<()>;

    /// Delete every document in a workspace (snapshots and update logs).
    fn delete_workspace(&self, workspace_id: &str) -> StoreResult<()>;

    /// Last-modified timestamps for every doc in a workspace.
    ///
    /// For each doc this is the later of the snapshot `updated_at` and the
    /// max pending-update `created_at` (pending updates win when both
    /// exist). With `after` set, only entries strictly newer are returned.
    fn doc_timestamps(
        &self,
        workspace_id: &str,
        after: Option<i64>,
    ) -> StoreResult<HashMap<String, i64>>;
}
