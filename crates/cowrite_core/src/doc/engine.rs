//! Orchestration of the update log, snapshot table, and merge operator.
//!
//! `DocEngine` owns the transition logic between the two tables: appends go
//! to the log (with bounded retry), reads merge pending updates into the
//! snapshot and compact the log as a side effect. Callers never write
//! snapshots directly.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::merge::{MergeOperator, YrsMerge, is_empty_state};
use super::store::DocStore;
use super::types::{DocState, SnapshotEvent};
use crate::error::{CowriteError, Result};

/// Total append attempts per `push_update` call (1 initial + 3 retries).
///
/// Retries are immediate and unconditional; the common failure mode is
/// transient write contention, and a failed save must surface to the editor
/// quickly rather than linger in a backoff loop.
pub const MAX_PUSH_ATTEMPTS: u32 = 4;

/// Storage engine for collaboratively edited documents.
///
/// Many request-handling workers call into one engine concurrently; the
/// engine holds no locks across store calls. Coordination is pushed down to
/// the store's row-level atomicity and the `updated_at` conflict guard in
/// [`get_doc`](Self::get_doc). Two concurrent reads may merge the same
/// pending set; merge-operator idempotence makes that safe.
pub struct DocEngine {
    store: Arc<dyn DocStore>,
    merge: Arc<dyn MergeOperator>,
    /// Optional observer invoked after each snapshot promotion.
    promotion_hook: RwLock<Option<Arc<dyn Fn(&SnapshotEvent) + Send + Sync>>>,
}

impl DocEngine {
    /// Create an engine over the given store, merging with [`YrsMerge`].
    pub fn new(store: Arc<dyn DocStore>) -> Self {
        Self::with_merge(store, Arc::new(YrsMerge))
    }

    /// Create an engine with a custom merge operator.
    pub fn with_merge(store: Arc<dyn DocStore>, merge: Arc<dyn MergeOperator>) -> Self {
        Self {
            store,
            merge,
            promotion_hook: RwLock::new(None),
        }
    }

    /// Set the observer invoked after each snapshot promotion.
    ///
    /// Out-of-band consumers (history snapshot generation, cache
    /// invalidation) hang off this hook. The hook body is the
    /// collaborator's concern; it returns nothing and its panics are not
    /// caught.
    pub fn set_promotion_hook(&self, hook: Arc<dyn Fn(&SnapshotEvent) + Send + Sync>) {
        let mut slot = self.promotion_hook.write().unwrap();
        *slot = Some(hook);
    }

    fn notify_promoted(&self, event: &SnapshotEvent) {
        let hook = self.promotion_hook.read().unwrap();
        if let Some(ref hook) = *hook {
            hook(event);
        }
    }

    /// Durably append one update to a document's log.
    ///
    /// Appends are retried up to [`MAX_PUSH_ATTEMPTS`] times in total,
    /// immediately and regardless of error type. Exactly one row is
    /// appended on success; zero on permanent failure.
    ///
    /// # Errors
    ///
    /// Returns [`CowriteError::UpdateNotSaved`] once the attempt budget is
    /// exhausted. The caller must surface this to the editor as a failed
    /// save; the engine does not retry further.
    pub fn push_update(
        &self,
        workspace_id: &str,
        doc_id: &str,
        blob: &[u8],
        editor_id: Option<&str>,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .store
                .append_update(workspace_id, doc_id, blob, editor_id)
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    log::warn!(
                        "failed to append update for {}/{} (attempt {}/{}): {}",
                        workspace_id,
                        doc_id,
                        attempt,
                        MAX_PUSH_ATTEMPTS,
                        e
                    );
                    if attempt >= MAX_PUSH_ATTEMPTS {
                        return Err(CowriteError::UpdateNotSaved {
                            workspace_id: workspace_id.to_string(),
                            doc_id: doc_id.to_string(),
                            source: Box::new(e),
                        });
                    }
                }
            }
        }
    }

    /// Read the fully merged document, compacting the update log on the way.
    ///
    /// Pending updates are folded into the stored snapshot and the result is
    /// promoted back to the snapshot table, unless the stored snapshot's
    /// `updated_at` is already newer than anything in the pending set (an
    /// out-of-band writer advanced it independently). `updated_at` never
    /// moves backwards. The consumed updates are deleted either way, so a
    /// skipped promotion leaves later readers on the older snapshot — the
    /// merged bytes returned here are still complete.
    ///
    /// Returns `None` only for a document with neither snapshot nor updates.
    pub fn get_doc(&self, workspace_id: &str, doc_id: &str) -> Result<Option<DocState>> {
        let snapshot = self.store.snapshot(workspace_id, doc_id)?;
        let after_seq = snapshot.as_ref().map(|s| s.seq).unwrap_or(0);
        let pending = self.store.updates_since(workspace_id, doc_id, after_seq)?;

        if pending.is_empty() {
            return Ok(snapshot.map(|s| DocState {
                blob: s.blob,
                state_version: s.updated_at,
            }));
        }

        let blobs: Vec<&[u8]> = pending.iter().map(|u| u.blob.as_slice()).collect();
        let merged = self
            .merge
            .merge(snapshot.as_ref().map(|s| s.blob.as_slice()), &blobs)?;

        let candidate_ts = pending
            .iter()
            .map(|u| u.created_at)
            .max()
            .unwrap_or_default();
        let top_seq = pending.iter().map(|u| u.seq).max().unwrap_or(after_seq);

        let snapshot_is_older = snapshot
            .as_ref()
            .is_none_or(|s| candidate_ts > s.updated_at);

        if snapshot_is_older && !is_empty_state(&merged) {
            self.store
                .set_snapshot(workspace_id, doc_id, &merged, top_seq, candidate_ts)
                .map_err(|e| CowriteError::SnapshotNotSaved {
                    workspace_id: workspace_id.to_string(),
                    doc_id: doc_id.to_string(),
                    source: Box::new(e),
                })?;

            self.notify_promoted(&SnapshotEvent {
                workspace_id: workspace_id.to_string(),
                doc_id: doc_id.to_string(),
                state_version: candidate_ts,
            });
        } else {
            log::debug!(
                "skipping snapshot promotion for {}/{}: stored snapshot is newer",
                workspace_id,
                doc_id
            );
        }

        // Compaction always consumes the updates it merged, promoted or not
        let seqs: Vec<i64> = pending.iter().map(|u| u.seq).collect();
        self.store.delete_updates(workspace_id, doc_id, &seqs)?;

        Ok(Some(DocState {
            blob: merged,
            state_version: candidate_ts,
        }))
    }

    /// Delete a document's snapshot and all of its update rows.
    pub fn delete_doc(&self, workspace_id: &str, doc_id: &str) -> Result<()> {
        self.store.delete_doc(workspace_id, doc_id)
    }

    /// Delete every document in a workspace.
    pub fn delete_workspace(&self, workspace_id: &str) -> Result<()> {
        self.store.delete_workspace(workspace_id)
    }

    /// Last-modified timestamps for every doc in a workspace, optionally
    /// restricted to entries strictly newer than `after`.
    pub fn doc_timestamps(
        &self,
        workspace_id: &str,
        after: Option<i64>,
    ) -> Result<HashMap<String, i64>> {
        self.store.doc_timestamps(workspace_id, after)
    }
}

impl std::fmt::Debug for DocEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::MemoryStore;
    use crate::doc::store::{SnapshotStore, UpdateLogStore};

    /// Joins blobs with the snapshot, newline separated. Not a real CRDT,
    /// but enough to observe the engine's mechanics deterministically.
    struct JoinMerge;

    impl MergeOperator for JoinMerge {
        fn merge(&self, snapshot: Option<&[u8]>, updates: &[&[u8]]) -> Result<Vec<u8>> {
            let mut out = snapshot.map(<[u8]>::to_vec).unwrap_or_default();
            for update in updates {
                if !out.is_empty() {
                    out.push(b'\n');
                }
                out.extend_from_slice(update);
            }
            Ok(out)
        }
    }

    fn engine_with(store: Arc<MemoryStore>) -> DocEngine {
        DocEngine::with_merge(store, Arc::new(JoinMerge))
    }

    #[test]
    fn test_get_doc_unknown_is_none() {
        let engine = engine_with(Arc::new(MemoryStore::new()));
        assert!(engine.get_doc("w", "missing").unwrap().is_none());
    }

    #[test]
    fn test_get_doc_merges_and_compacts() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());

        engine.push_update("w", "d", b"one", Some("alice")).unwrap();
        engine.push_update("w", "d", b"two", Some("bob")).unwrap();

        let state = engine.get_doc("w", "d").unwrap().unwrap();
        assert_eq!(state.blob, b"one\ntwo");

        // Log drained, snapshot promoted
        assert!(store.updates_since("w", "d", 0).unwrap().is_empty());
        let snapshot = store.snapshot("w", "d").unwrap().unwrap();
        assert_eq!(snapshot.blob, b"one\ntwo");
        assert_eq!(snapshot.updated_at, state.state_version);

        // A second read serves the snapshot as-is
        let again = engine.get_doc("w", "d").unwrap().unwrap();
        assert_eq!(again.blob, b"one\ntwo");
    }

    #[test]
    fn test_conflict_guard_skips_promotion_but_still_compacts() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());

        let future = chrono::Utc::now().timestamp_millis() + 10_000;
        store.set_snapshot("w", "d", b"newer", 0, future).unwrap();

        engine.push_update("w", "d", b"late", None).unwrap();
        let state = engine.get_doc("w", "d").unwrap().unwrap();

        // The merged result is returned to this caller...
        assert_eq!(state.blob, b"newer\nlate");
        // ...but the stored snapshot was not rolled backwards
        let snapshot = store.snapshot("w", "d").unwrap().unwrap();
        assert_eq!(snapshot.blob, b"newer");
        assert_eq!(snapshot.updated_at, future);
        // ...and the consumed update is gone regardless
        assert!(store.updates_since("w", "d", 0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_merge_result_is_not_promoted() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());

        engine.push_update("w", "d", b"", None).unwrap();
        let state = engine.get_doc("w", "d").unwrap().unwrap();

        assert!(state.blob.is_empty());
        assert!(store.snapshot("w", "d").unwrap().is_none());
        assert!(store.updates_since("w", "d", 0).unwrap().is_empty());
    }

    #[test]
    fn test_promotion_hook_fires_on_promotion_only() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());

        let events = Arc::new(RwLock::new(Vec::new()));
        let sink = events.clone();
        engine.set_promotion_hook(Arc::new(move |event: &SnapshotEvent| {
            sink.write().unwrap().push(event.clone());
        }));

        engine.push_update("w", "d", b"one", None).unwrap();
        engine.get_doc("w", "d").unwrap();
        assert_eq!(events.read().unwrap().len(), 1);
        assert_eq!(events.read().unwrap()[0].doc_id, "d");

        // Guard-skip round: no event
        let future = chrono::Utc::now().timestamp_millis() + 10_000;
        store.set_snapshot("w", "d", b"newer", 1, future).unwrap();
        engine.push_update("w", "d", b"late", None).unwrap();
        engine.get_doc("w", "d").unwrap();
        assert_eq!(events.read().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_doc_passthrough() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(store.clone());

        engine.push_update("w", "d", b"one", None).unwrap();
        engine.get_doc("w", "d").unwrap();
        engine.delete_doc("w", "d").unwrap();

        assert!(engine.get_doc("w", "d").unwrap().is_none());
    }
}
