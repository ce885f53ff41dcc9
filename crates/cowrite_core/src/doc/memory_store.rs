//! In-memory storage implementation for testing.
//!
//! This provides a simple in-memory implementation of [`DocStore`] for use
//! in unit tests and prototyping. It is thread-safe via `RwLock` but data is
//! lost when dropped.

use std::collections::HashMap;
use std::sync::RwLock;

use super::store::{DocStore, SnapshotStore, StoreResult, UpdateLogStore};
use super::types::{DocSnapshot, DocUpdate};

type DocKey = (String, String);

#[derive(Debug, Clone)]
struct StoredUpdate {
    seq: i64,
    blob: Vec<u8>,
    created_at: i64,
    created_by: Option<String>,
}

/// Update log for a single document.
///
/// `next_seq` survives row deletion so sequence numbers stay strictly
/// increasing over the document's whole lifetime.
#[derive(Debug, Default)]
struct DocLog {
    next_seq: i64,
    rows: Vec<StoredUpdate>,
}

/// In-memory doc store for testing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Update logs keyed by (workspace_id, doc_id)
    logs: RwLock<HashMap<DocKey, DocLog>>,

    /// Snapshots keyed by (workspace_id, doc_id)
    snapshots: RwLock<HashMap<DocKey, DocSnapshot>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(workspace_id: &str, doc_id: &str) -> DocKey {
    (workspace_id.to_string(), doc_id.to_string())
}

impl UpdateLogStore for MemoryStore {
    fn append_update(
        &self,
        workspace_id: &str,
        doc_id: &str,
        blob: &[u8],
        created_by: Option<&str>,
    ) -> StoreResult<i64> {
        let mut logs = self.logs.write().unwrap();
        let log = logs.entry(key(workspace_id, doc_id)).or_default();

        log.next_seq += 1;
        let seq = log.next_seq;
        log.rows.push(StoredUpdate {
            seq,
            blob: blob.to_vec(),
            created_at: chrono::Utc::now().timestamp_millis(),
            created_by: created_by.map(str::to_string),
        });

        Ok(seq)
    }

    fn updates_since(
        &self,
        workspace_id: &str,
        doc_id: &str,
        after_seq: i64,
    ) -> StoreResult<Vec<DocUpdate>> {
        let logs = self.logs.read().unwrap();
        let rows = logs
            .get(&key(workspace_id, doc_id))
            .map(|log| log.rows.as_slice())
            .unwrap_or(&[]);

        Ok(rows
            .iter()
            .filter(|u| u.seq > after_seq)
            .map(|u| DocUpdate {
                seq: u.seq,
                blob: u.blob.clone(),
                created_at: u.created_at,
                created_by: u.created_by.clone(),
            })
            .collect())
    }

    fn delete_updates(&self, workspace_id: &str, doc_id: &str, seqs: &[i64]) -> StoreResult<usize> {
        let mut logs = self.logs.write().unwrap();
        let Some(log) = logs.get_mut(&key(workspace_id, doc_id)) else {
            return Ok(0);
        };

        let before = log.rows.len();
        log.rows.retain(|u| !seqs.contains(&u.seq));
        Ok(before - log.rows.len())
    }
}

impl SnapshotStore for MemoryStore {
    fn snapshot(&self, workspace_id: &str, doc_id: &str) -> StoreResult<Option<DocSnapshot>> {
        let snapshots = self.snapshots.read().unwrap();
        Ok(snapshots.get(&key(workspace_id, doc_id)).cloned())
    }

    fn set_snapshot(
        &self,
        workspace_id: &str,
        doc_id: &str,
        blob: &[u8],
        seq: i64,
        updated_at: i64,
    ) -> StoreResult<()> {
        let mut snapshots = self.snapshots.write().unwrap();
        snapshots.insert(
            key(workspace_id, doc_id),
            DocSnapshot {
                blob: blob.to_vec(),
                seq,
                updated_at,
            },
        );
        Ok(())
    }
}

impl DocStore for MemoryStore {
    fn delete_doc(&self, workspace_id: &str, doc_id: &str) -> StoreResult<()> {
        let mut logs = self.logs.write().unwrap();
        let mut snapshots = self.snapshots.write().unwrap();
        logs.remove(&key(workspace_id, doc_id));
        snapshots.remove(&key(workspace_id, doc_id));
        Ok(())
    }

    fn delete_workspace(&self, workspace_id: &str) -> StoreResult<()> {
        let mut logs = self.logs.write().unwrap();
        let mut snapshots = self.snapshots.write().unwrap();
        logs.retain(|(ws, _), _| ws != workspace_id);
        snapshots.retain(|(ws, _), _| ws != workspace_id);
        Ok(())
    }

    fn doc_timestamps(
        &self,
        workspace_id: &str,
        after: Option<i64>,
    ) -> StoreResult<HashMap<String, i64>> {
        let logs = self.logs.read().unwrap();
        let snapshots = self.snapshots.read().unwrap();

        let mut result = HashMap::new();

        for ((ws, doc_id), snapshot) in snapshots.iter() {
            if ws == workspace_id {
                result.insert(doc_id.clone(), snapshot.updated_at);
            }
        }

        // Pending updates win over the snapshot timestamp
        for ((ws, doc_id), log) in logs.iter() {
            if ws != workspace_id {
                continue;
            }
            if let Some(max) = log.rows.iter().map(|u| u.created_at).max() {
                result.insert(doc_id.clone(), max);
            }
        }

        if let Some(after) = after {
            result.retain(|_, ts| *ts > after);
        }

        Ok(result)
    }
}
