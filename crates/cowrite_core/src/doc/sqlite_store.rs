//! SQLite-backed storage implementation for document persistence.
//!
//! This is the production backend: the update log, the snapshot table, and a
//! per-document sequence counter live in one SQLite database. Sequence
//! numbers are allocated inside the same transaction as the row insert, so
//! they stay strictly increasing per document even with multiple writers and
//! across compaction deletes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, params};

use super::store::{DocStore, SnapshotStore, StoreResult, UpdateLogStore};
use super::types::{DocSnapshot, DocUpdate};
use crate::error::CowriteError;

/// SQLite-backed doc store.
///
/// # Thread Safety
///
/// The connection is wrapped in a `Mutex` for thread-safe access.
/// SQLite itself is used in serialized threading mode.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    ///
    /// This will create the necessary tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or if schema
    /// initialization fails.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database.
    ///
    /// Data is lost when the store is dropped.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            -- Append-only update log
            CREATE TABLE IF NOT EXISTS updates (
                workspace_id TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                blob BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                created_by TEXT,
                PRIMARY KEY (workspace_id, doc_id, seq)
            );

            -- Index for timestamp scans (doc_timestamps)
            CREATE INDEX IF NOT EXISTS idx_updates_created_at
                ON updates(workspace_id, created_at);

            -- Merged snapshots, at most one row per document
            CREATE TABLE IF NOT EXISTS snapshots (
                workspace_id TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                blob BLOB NOT NULL,
                seq INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (workspace_id, doc_id)
            );

            -- Per-document sequence allocation; survives update deletion
            CREATE TABLE IF NOT EXISTS doc_seq (
                workspace_id TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                PRIMARY KEY (workspace_id, doc_id)
            );
            "#,
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl UpdateLogStore for SqliteStore {
    fn append_update(
        &self,
        workspace_id: &str,
        doc_id: &str,
        blob: &[u8],
        created_by: Option<&str>,
    ) -> StoreResult<i64> {
        let mut conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        // Sequence allocation and row insert commit together or not at all
        let tx = conn.transaction()?;

        let seq: i64 = tx.query_row(
            "INSERT INTO doc_seq (workspace_id, doc_id, seq) VALUES (?1, ?2, 1)
             ON CONFLICT (workspace_id, doc_id) DO UPDATE SET seq = seq + 1
             RETURNING seq",
            params![workspace_id, doc_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO updates (workspace_id, doc_id, seq, blob, created_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![workspace_id, doc_id, seq, blob, now, created_by],
        )?;

        tx.commit()?;
        Ok(seq)
    }

    fn updates_since(
        &self,
        workspace_id: &str,
        doc_id: &str,
        after_seq: i64,
    ) -> StoreResult<Vec<DocUpdate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT seq, blob, created_at, created_by FROM updates
             WHERE workspace_id = ?1 AND doc_id = ?2 AND seq > ?3
             ORDER BY seq ASC",
        )?;

        let updates = stmt
            .query_map(params![workspace_id, doc_id, after_seq], |row| {
                Ok(DocUpdate {
                    seq: row.get(0)?,
                    blob: row.get(1)?,
                    created_at: row.get(2)?,
                    created_by: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(updates)
    }

    fn delete_updates(&self, workspace_id: &str, doc_id: &str, seqs: &[i64]) -> StoreResult<usize> {
        if seqs.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut deleted = 0;

        {
            let mut stmt = tx.prepare(
                "DELETE FROM updates WHERE workspace_id = ?1 AND doc_id = ?2 AND seq = ?3",
            )?;
            for seq in seqs {
                deleted += stmt.execute(params![workspace_id, doc_id, seq])?;
            }
        }

        tx.commit()?;
        Ok(deleted)
    }
}

impl SnapshotStore for SqliteStore {
    fn snapshot(&self, workspace_id: &str, doc_id: &str) -> StoreResult<Option<DocSnapshot>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT blob, seq, updated_at FROM snapshots
             WHERE workspace_id = ?1 AND doc_id = ?2",
            params![workspace_id, doc_id],
            |row| {
                Ok(DocSnapshot {
                    blob: row.get(0)?,
                    seq: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        );

        match result {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CowriteError::Database(e)),
        }
    }

    fn set_snapshot(
        &self,
        workspace_id: &str,
        doc_id: &str,
        blob: &[u8],
        seq: i64,
        updated_at: i64,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO snapshots (workspace_id, doc_id, blob, seq, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![workspace_id, doc_id, blob, seq, updated_at],
        )?;
        Ok(())
    }
}

impl DocStore for SqliteStore {
    fn delete_doc(&self, workspace_id: &str, doc_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM updates WHERE workspace_id = ?1 AND doc_id = ?2",
            params![workspace_id, doc_id],
        )?;
        tx.execute(
            "DELETE FROM snapshots WHERE workspace_id = ?1 AND doc_id = ?2",
            params![workspace_id, doc_id],
        )?;
        tx.execute(
            "DELETE FROM doc_seq WHERE workspace_id = ?1 AND doc_id = ?2",
            params![workspace_id, doc_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_workspace(&self, workspace_id: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM updates WHERE workspace_id = ?1",
            params![workspace_id],
        )?;
        tx.execute(
            "DELETE FROM snapshots WHERE workspace_id = ?1",
            params![workspace_id],
        )?;
        tx.execute(
            "DELETE FROM doc_seq WHERE workspace_id = ?1",
            params![workspace_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn doc_timestamps(
        &self,
        workspace_id: &str,
        after: Option<i64>,
    ) -> StoreResult<HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let cutoff = after.unwrap_or(i64::MIN);
        let mut result = HashMap::new();

        let mut stmt = conn.prepare(
            "SELECT doc_id, updated_at FROM snapshots
             WHERE workspace_id = ?1 AND updated_at > ?2",
        )?;
        let rows = stmt.query_map(params![workspace_id, cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (doc_id, updated_at) = row?;
            result.insert(doc_id, updated_at);
        }

        // Pending updates win over the snapshot timestamp
        let mut stmt = conn.prepare(
            "SELECT doc_id, MAX(created_at) FROM updates
             WHERE workspace_id = ?1 AND created_at > ?2
             GROUP BY doc_id",
        )?;
        let rows = stmt.query_map(params![workspace_id, cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (doc_id, created_at) = row?;
            result.insert(doc_id, created_at);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_append_and_list_updates() {
        let store = SqliteStore::in_memory().unwrap();

        let seq1 = store.append_update("w", "d", b"update1", Some("alice")).unwrap();
        let seq2 = store.append_update("w", "d", b"update2", None).unwrap();

        assert!(seq1 < seq2);

        let all = store.updates_since("w", "d", 0).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].blob, b"update1");
        assert_eq!(all[0].created_by.as_deref(), Some("alice"));
        assert!(all[1].created_by.is_none());

        let since = store.updates_since("w", "d", seq1).unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].seq, seq2);
    }

    #[test]
    fn test_sqlite_seq_is_per_document() {
        let store = SqliteStore::in_memory().unwrap();

        assert_eq!(store.append_update("w", "a", b"x", None).unwrap(), 1);
        assert_eq!(store.append_update("w", "b", b"x", None).unwrap(), 1);
        assert_eq!(store.append_update("w", "a", b"y", None).unwrap(), 2);
    }

    #[test]
    fn test_sqlite_seq_survives_deletion() {
        let store = SqliteStore::in_memory().unwrap();

        let seq1 = store.append_update("w", "d", b"x", None).unwrap();
        let seq2 = store.append_update("w", "d", b"y", None).unwrap();
        store.delete_updates("w", "d", &[seq1, seq2]).unwrap();

        let seq3 = store.append_update("w", "d", b"z", None).unwrap();
        assert!(seq3 > seq2);

        // A reader cursored past the deleted rows still sees the new one
        let pending = store.updates_since("w", "d", seq2).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].seq, seq3);
    }

    #[test]
    fn test_sqlite_delete_updates_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();

        let seq = store.append_update("w", "d", b"x", None).unwrap();
        assert_eq!(store.delete_updates("w", "d", &[seq]).unwrap(), 1);
        assert_eq!(store.delete_updates("w", "d", &[seq]).unwrap(), 0);
        assert_eq!(store.delete_updates("w", "d", &[]).unwrap(), 0);
    }

    #[test]
    fn test_sqlite_snapshot_round_trip() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(store.snapshot("w", "d").unwrap().is_none());

        store.set_snapshot("w", "d", b"state", 3, 1000).unwrap();
        let snapshot = store.snapshot("w", "d").unwrap().unwrap();
        assert_eq!(snapshot.blob, b"state");
        assert_eq!(snapshot.seq, 3);
        assert_eq!(snapshot.updated_at, 1000);

        // Overwrites unconditionally
        store.set_snapshot("w", "d", b"older", 2, 500).unwrap();
        assert_eq!(store.snapshot("w", "d").unwrap().unwrap().updated_at, 500);
    }

    #[test]
    fn test_sqlite_delete_doc() {
        let store = SqliteStore::in_memory().unwrap();

        store.append_update("w", "d", b"x", None).unwrap();
        store.set_snapshot("w", "d", b"state", 1, 1000).unwrap();
        store.append_update("w", "other", b"x", None).unwrap();

        store.delete_doc("w", "d").unwrap();

        assert!(store.snapshot("w", "d").unwrap().is_none());
        assert!(store.updates_since("w", "d", 0).unwrap().is_empty());
        assert_eq!(store.updates_since("w", "other", 0).unwrap().len(), 1);

        // Deleting a missing doc is a no-op
        store.delete_doc("w", "gone").unwrap();
    }

    #[test]
    fn test_sqlite_delete_workspace() {
        let store = SqliteStore::in_memory().unwrap();

        store.append_update("w1", "a", b"x", None).unwrap();
        store.set_snapshot("w1", "b", b"state", 1, 1000).unwrap();
        store.append_update("w2", "a", b"x", None).unwrap();

        store.delete_workspace("w1").unwrap();

        assert!(store.updates_since("w1", "a", 0).unwrap().is_empty());
        assert!(store.snapshot("w1", "b").unwrap().is_none());
        assert_eq!(store.updates_since("w2", "a", 0).unwrap().len(), 1);
    }

    #[test]
    fn test_sqlite_doc_timestamps() {
        let store = SqliteStore::in_memory().unwrap();

        store.set_snapshot("w", "snap-only", b"s", 1, 100).unwrap();
        store.set_snapshot("w", "both", b"s", 1, 100).unwrap();
        store.append_update("w", "both", b"x", None).unwrap();
        store.append_update("w", "log-only", b"x", None).unwrap();
        store.set_snapshot("other", "d", b"s", 1, 100).unwrap();

        let timestamps = store.doc_timestamps("w", None).unwrap();
        assert_eq!(timestamps.len(), 3);
        assert_eq!(timestamps["snap-only"], 100);
        assert!(timestamps["both"] > 100);

        let recent = store.doc_timestamps("w", Some(100)).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(!recent.contains_key("snap-only"));
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.append_update("w", "d", b"x", None).unwrap();
            store.set_snapshot("w", "d", b"state", 1, 1000).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.updates_since("w", "d", 0).unwrap().len(), 1);
        assert_eq!(store.snapshot("w", "d").unwrap().unwrap().blob, b"state");

        // Sequence allocation continues where it left off
        assert_eq!(store.append_update("w", "d", b"y", None).unwrap(), 2);
    }
}
