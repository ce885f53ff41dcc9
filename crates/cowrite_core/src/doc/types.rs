//! Core types for document persistence.
//!
//! These records mirror the two persisted tables (update log and snapshots)
//! plus the merged view handed back to readers.

/// One immutable update record in a document's update log.
///
/// Updates are identified by `(workspace_id, doc_id, seq)`; the store assigns
/// `seq` at insert time, strictly increasing per document. Once written an
/// update is only ever read or bulk-deleted, never mutated.
#[derive(Debug, Clone)]
pub struct DocUpdate {
    /// Store-assigned sequence number, strictly increasing per document
    pub seq: i64,

    /// Opaque binary delta produced by an editor
    pub blob: Vec<u8>,

    /// Unix timestamp when the update was appended (milliseconds)
    pub created_at: i64,

    /// Editor identity, None for system-generated updates
    pub created_by: Option<String>,
}

/// The durable merged state of a document.
///
/// At most one snapshot exists per `(workspace_id, doc_id)`. `updated_at` is
/// monotonically non-decreasing across promotions; the engine's conflict
/// guard enforces this, the store itself overwrites unconditionally.
#[derive(Debug, Clone)]
pub struct DocSnapshot {
    /// Fully merged binary state
    pub blob: Vec<u8>,

    /// Highest update seq consumed into this snapshot
    pub seq: i64,

    /// Unix timestamp of the last successful promotion (milliseconds)
    pub updated_at: i64,
}

/// The merged document returned by a read.
///
/// This is a logical view (snapshot plus pending updates), never persisted as
/// its own entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocState {
    /// Fully merged binary state
    pub blob: Vec<u8>,

    /// Timestamp the blob derives from (milliseconds)
    pub state_version: i64,
}

/// Notification emitted after a snapshot promotion.
///
/// Out-of-band consumers (history snapshot generation, cache invalidation)
/// subscribe to these via [`DocEngine::set_promotion_hook`].
///
/// [`DocEngine::set_promotion_hook`]: super::DocEngine::set_promotion_hook
#[derive(Debug, Clone)]
pub struct SnapshotEvent {
    /// Workspace the promoted document belongs to
    pub workspace_id: String,

    /// The promoted document
    pub doc_id: String,

    /// `updated_at` of the newly promoted snapshot (milliseconds)
    pub state_version: i64,
}
