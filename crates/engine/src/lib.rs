pub mod classifier;
pub mod error;
pub mod provider;
pub mod stats;
pub mod strategy;
pub mod suggestion;

pub use classifier::Classification;
pub use error::EngineError;
pub use provider::{ProviderError, SnapshotProvider};
pub use stats::{StatsAggregator, StatsReport};
pub use strategy::Resolution;

use regsync_core::{
    ConflictData, ConflictId, ConflictStats, ConflictStatus, EngineConfig, Hlc, HlcClock,
    RecordKey, RecordSnapshots, ResolutionStrategy, ResolvedStrategy, Scope,
};
use regsync_storage::{ConflictStorage, ResolveOutcome, SqliteStorage};
use tracing::{debug, info, warn};

/// A record that could not be classified during a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub key: RecordKey,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub auto_closed: usize,
    /// Resolved conflicts whose snapshots have not changed since resolution.
    pub awaiting_propagation: usize,
    pub identical: usize,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedConflict {
    pub conflict_id: ConflictId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub resolved_count: usize,
    pub skipped: Vec<SkippedConflict>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Created,
    Updated,
    Unchanged,
    AutoClosed,
    AwaitingPropagation,
    Identical,
}

pub struct ConflictEngine<P: SnapshotProvider> {
    config: EngineConfig,
    clock: HlcClock,
    storage: SqliteStorage,
    provider: P,
}

impl<P: SnapshotProvider> ConflictEngine<P> {
    pub fn new(
        config: EngineConfig,
        storage: SqliteStorage,
        provider: P,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            clock: HlcClock::new(),
            storage,
            provider,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    /// `Merge` at the configured threshold.
    pub fn default_merge(&self) -> ResolutionStrategy {
        ResolutionStrategy::Merge {
            threshold: self.config.merge_threshold,
        }
    }

    /// Execute a batch SQL statement on the underlying connection, mapping errors.
    fn exec_batch(&self, sql: &str) -> Result<(), EngineError> {
        self.storage
            .conn()
            .execute_batch(sql)
            .map_err(|e| EngineError::Storage(regsync_storage::StorageError::Sqlite(e)))
    }

    /// Run `f` inside `BEGIN IMMEDIATE`, committing on success.
    fn in_transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.exec_batch("BEGIN IMMEDIATE")?;
        let result = f(self).and_then(|value| self.exec_batch("COMMIT").map(|()| value));
        if result.is_err() {
            let _ = self.exec_batch("ROLLBACK");
        }
        result
    }

    // ========================================================================
    // Detection
    // ========================================================================

    /// Refresh `scope` and return its pending conflicts.
    pub fn detect_conflicts(&mut self, scope: &Scope) -> Result<Vec<ConflictData>, EngineError> {
        self.refresh(scope)?;
        self.list_pending(scope)
    }

    /// Re-classify every record the provider lists for `scope` and reconcile
    /// the results with stored conflicts.
    pub fn refresh(&mut self, scope: &Scope) -> Result<RefreshReport, EngineError> {
        let keys = self.provider.list_records(scope)?;
        let mut report = RefreshReport::default();

        for key in keys {
            let snapshots = match self.provider.fetch_snapshots(scope, &key) {
                Ok(snapshots) => snapshots,
                Err(err) => {
                    warn!(%scope, record = %key, error = %err, "skipping record during refresh");
                    report.skipped.push(SkippedRecord {
                        key,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let reconciled =
                self.in_transaction(|engine| engine.reconcile_record(scope, &key, &snapshots));
            let outcome = match reconciled {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(%scope, record = %key, error = %err, "could not reconcile record");
                    report.skipped.push(SkippedRecord {
                        key,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            match outcome {
                RecordOutcome::Created => report.created += 1,
                RecordOutcome::Updated => report.updated += 1,
                RecordOutcome::Unchanged => report.unchanged += 1,
                RecordOutcome::AutoClosed => report.auto_closed += 1,
                RecordOutcome::AwaitingPropagation => report.awaiting_propagation += 1,
                RecordOutcome::Identical => report.identical += 1,
            }
        }

        info!(
            %scope,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            auto_closed = report.auto_closed,
            awaiting_propagation = report.awaiting_propagation,
            skipped = report.skipped.len(),
            "refresh complete"
        );
        Ok(report)
    }

    /// Runs inside the caller's transaction, so the status read and the write
    /// below cannot interleave with a concurrent resolve.
    fn reconcile_record(
        &mut self,
        scope: &Scope,
        key: &RecordKey,
        snapshots: &RecordSnapshots,
    ) -> Result<RecordOutcome, EngineError> {
        let head = self.storage.latest_for_record(scope, key)?;

        let Some(classification) = classifier::classify(snapshots, &self.config) else {
            if let Some(head) = head
                && head.status == ConflictStatus::Pending
            {
                let at = self.clock.tick()?;
                self.storage.mark_resolved(
                    head.conflict_id,
                    head.fingerprint,
                    &snapshots.target.fields,
                    ResolvedStrategy::AutoClosed,
                    at,
                )?;
                debug!(conflict_id = %head.conflict_id, record = %key, "auto-closed converged record");
                return Ok(RecordOutcome::AutoClosed);
            }
            return Ok(RecordOutcome::Identical);
        };

        let fingerprint = snapshots.fingerprint(&self.config)?;
        if let Some(head) = &head
            && head.fingerprint == fingerprint
        {
            return Ok(match head.status {
                ConflictStatus::Pending => RecordOutcome::Unchanged,
                ConflictStatus::Resolved => RecordOutcome::AwaitingPropagation,
            });
        }

        let now = self.clock.tick()?;
        let conflict = ConflictData {
            id: ConflictId::new(),
            scope: scope.clone(),
            table_name: key.table_name.clone(),
            record_id: key.record_id.clone(),
            conflict_type: classification.conflict_type,
            source_data: snapshots.source.clone(),
            target_data: snapshots.target.clone(),
            baseline: snapshots.baseline,
            suggestions: classification.suggestions,
            status: ConflictStatus::Pending,
            detected_at: now,
            resolved_data: None,
            resolved_strategy: None,
            resolved_at: None,
            archived_at: None,
        };
        let outcome = self.storage.upsert_pending(&conflict, fingerprint, now)?;
        debug!(
            conflict_id = %outcome.conflict.id,
            record = %key,
            conflict_type = outcome.conflict.conflict_type.as_str(),
            created = outcome.created,
            "conflict recorded"
        );
        Ok(if outcome.created {
            RecordOutcome::Created
        } else {
            RecordOutcome::Updated
        })
    }

    // ========================================================================
    // Conflict Queries
    // ========================================================================

    pub fn list_pending(&self, scope: &Scope) -> Result<Vec<ConflictData>, EngineError> {
        Ok(self.storage.list_pending(scope)?)
    }

    pub fn get_conflict(&self, conflict_id: ConflictId) -> Result<Option<ConflictData>, EngineError> {
        Ok(self.storage.get_conflict(conflict_id)?)
    }

    /// Resolved conflicts in resolution order, excluding archived ones.
    pub fn resolution_history(&self, scope: &Scope) -> Result<Vec<ConflictData>, EngineError> {
        Ok(self.storage.resolution_history(scope, false)?)
    }

    // ========================================================================
    // Conflict Resolution
    // ========================================================================

    /// Resolve one conflict. Re-resolving with identical data is a no-op success.
    pub fn resolve_conflict(
        &mut self,
        conflict_id: ConflictId,
        strategy: &ResolutionStrategy,
    ) -> Result<ConflictData, EngineError> {
        let (conflict, _) = self.resolve_inner(conflict_id, strategy)?;
        Ok(conflict)
    }

    fn resolve_inner(
        &mut self,
        conflict_id: ConflictId,
        strategy: &ResolutionStrategy,
    ) -> Result<(ConflictData, ResolveOutcome), EngineError> {
        match self.in_transaction(|engine| engine.resolve_once(conflict_id, strategy)) {
            Err(err) if err.is_transient() => {
                warn!(%conflict_id, error = %err, "transient store failure, retrying resolve once");
                self.in_transaction(|engine| engine.resolve_once(conflict_id, strategy))
            }
            other => other,
        }
    }

    /// Read, compute and write under one write lock, so a concurrent refresh
    /// cannot replace the snapshots between the read and the write.
    fn resolve_once(
        &mut self,
        conflict_id: ConflictId,
        strategy: &ResolutionStrategy,
    ) -> Result<(ConflictData, ResolveOutcome), EngineError> {
        let not_found = || EngineError::ConflictNotFound(conflict_id.to_string());
        let conflict = self.storage.get_conflict(conflict_id)?.ok_or_else(not_found)?;
        let fingerprint = self
            .storage
            .conflict_fingerprint(conflict_id)?
            .ok_or_else(not_found)?;

        let resolution = strategy::execute(&conflict, strategy, &self.config)?;
        let resolved_at = self.clock.tick()?;
        let outcome = self.storage.mark_resolved(
            conflict_id,
            fingerprint,
            &resolution.data,
            resolution.strategy,
            resolved_at,
        )?;

        debug!(
            %conflict_id,
            strategy = resolution.strategy.as_str(),
            adopted = resolution.adopted.len(),
            already_applied = outcome == ResolveOutcome::AlreadyApplied,
            "conflict resolved"
        );

        let stored = self.storage.get_conflict(conflict_id)?.ok_or_else(not_found)?;
        Ok((stored, outcome))
    }

    /// Apply one automatic strategy to every pending conflict in `scope`.
    ///
    /// Conflicts that fail are reported in `skipped` and left pending.
    pub fn auto_resolve_conflicts(
        &mut self,
        scope: &Scope,
        strategy: &ResolutionStrategy,
    ) -> Result<BatchResult, EngineError> {
        if let ResolutionStrategy::Manual { .. } = strategy {
            return Err(EngineError::StrategyNotBatchable(ResolvedStrategy::Manual.as_str()));
        }

        let pending = self.list_pending(scope)?;
        let mut result = BatchResult::default();
        for conflict in pending {
            match self.resolve_inner(conflict.id, strategy) {
                Ok((_, ResolveOutcome::Resolved)) => result.resolved_count += 1,
                Ok((_, ResolveOutcome::AlreadyApplied)) => {
                    result.skipped.push(SkippedConflict {
                        conflict_id: conflict.id,
                        reason: "already resolved by another caller".into(),
                    });
                }
                Err(err) => {
                    warn!(conflict_id = %conflict.id, error = %err, "batch skipped conflict");
                    result.skipped.push(SkippedConflict {
                        conflict_id: conflict.id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            %scope,
            strategy = strategy.kind().as_str(),
            resolved = result.resolved_count,
            skipped = result.skipped.len(),
            "batch resolution complete"
        );
        Ok(result)
    }

    // ========================================================================
    // Stats & Audit
    // ========================================================================

    pub fn get_stats(&self, scope: &Scope) -> Result<ConflictStats, EngineError> {
        StatsAggregator::new(&self.storage).stats(scope)
    }

    pub fn stats_report(&self, scope: &Scope) -> Result<StatsReport, EngineError> {
        StatsAggregator::new(&self.storage).report(scope)
    }

    /// Archive conflicts resolved before `before`. Returns how many were archived.
    pub fn archive_resolved(&mut self, scope: &Scope, before: Hlc) -> Result<u64, EngineError> {
        let at = self.clock.tick()?;
        let archived = self.storage.archive_resolved(scope, before, at)?;
        info!(%scope, archived, "archived resolved conflicts");
        Ok(archived)
    }

    /// Current HLC reading, usable as an archive cutoff.
    pub fn now(&mut self) -> Result<Hlc, EngineError> {
        Ok(self.clock.tick()?)
    }
}
