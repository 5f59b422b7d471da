use std::collections::BTreeMap;

use regsync_core::{
    ConflictData, ConflictId, ConflictStats, ConflictStatus, FieldMap, Hlc, RecordKey,
    ResolvedStrategy, Scope,
};

use crate::error::StorageError;

/// Result of writing a freshly classified conflict.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// The stored entry. Keeps the original id and `detected_at` on update.
    pub conflict: ConflictData,
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// This call performed the `pending -> resolved` transition.
    Resolved,
    /// Already resolved with identical data; nothing written.
    AlreadyApplied,
}

/// Lightweight view of the newest conflict for a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordConflictHead {
    pub conflict_id: ConflictId,
    pub status: ConflictStatus,
    pub fingerprint: [u8; 32],
}

pub trait ConflictStorage {
    /// Insert a pending conflict, or refresh the pending entry already held
    /// for the same record.
    fn upsert_pending(
        &mut self,
        conflict: &ConflictData,
        fingerprint: [u8; 32],
        observed_at: Hlc,
    ) -> Result<UpsertOutcome, StorageError>;

    fn get_conflict(&self, conflict_id: ConflictId) -> Result<Option<ConflictData>, StorageError>;

    /// Fingerprint of the snapshots the stored conflict was classified from.
    fn conflict_fingerprint(&self, conflict_id: ConflictId)
        -> Result<Option<[u8; 32]>, StorageError>;

    fn latest_for_record(
        &self,
        scope: &Scope,
        key: &RecordKey,
    ) -> Result<Option<RecordConflictHead>, StorageError>;

    /// Pending conflicts ordered by `detected_at`.
    fn list_pending(&self, scope: &Scope) -> Result<Vec<ConflictData>, StorageError>;

    /// Atomically move a pending conflict to resolved.
    ///
    /// `expected_fingerprint` is the fingerprint of the copy `resolved_data`
    /// was computed from; if a refresh has since replaced the snapshots the
    /// write is refused with [`StorageError::ConflictChanged`].
    fn mark_resolved(
        &mut self,
        conflict_id: ConflictId,
        expected_fingerprint: [u8; 32],
        resolved_data: &FieldMap,
        strategy: ResolvedStrategy,
        resolved_at: Hlc,
    ) -> Result<ResolveOutcome, StorageError>;

    fn stats(&self, scope: &Scope) -> Result<ConflictStats, StorageError>;

    fn stats_by_table(&self, scope: &Scope)
        -> Result<BTreeMap<String, ConflictStats>, StorageError>;

    /// Resolved conflicts ordered by `resolved_at`.
    fn resolution_history(
        &self,
        scope: &Scope,
        include_archived: bool,
    ) -> Result<Vec<ConflictData>, StorageError>;

    /// Stamp resolved conflicts older than `before` as archived. Returns the count.
    fn archive_resolved(
        &mut self,
        scope: &Scope,
        before: Hlc,
        archived_at: Hlc,
    ) -> Result<u64, StorageError>;
}
