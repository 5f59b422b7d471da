use pretty_assertions::assert_eq;
use regsync_core::{ConflictStatus, FieldValue, RecordSnapshots, ResolutionStrategy};
use regsync_engine::EngineError;
use regsync_harness::{TestAgency, fields, key, snapshot};

const T0: i64 = 1_700_000_000_000;
const HOUR: i64 = 3_600_000;

fn recent_edit(table: &str, id: &str, agency: &mut TestAgency) {
    agency.put(
        &key(table, id),
        RecordSnapshots::new(
            snapshot(vec![
                ("status", "active".into()),
                ("region", "north".into()),
                ("updated_at", FieldValue::Timestamp(T0)),
            ]),
            snapshot(vec![
                ("status", "inactive".into()),
                ("region", "south".into()),
                ("updated_at", FieldValue::Timestamp(T0 + 3 * HOUR)),
            ]),
        ),
    );
}

fn untimed_edit(table: &str, id: &str, agency: &mut TestAgency) {
    agency.put(
        &key(table, id),
        RecordSnapshots::new(
            snapshot(vec![("owner", "alice".into())]),
            snapshot(vec![("owner", "bob".into())]),
        ),
    );
}

// ============================================================================
// Auto-resolve batches
// ============================================================================

#[test]
fn merge_batch_resolves_every_confident_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    recent_edit("projects", "p-1", &mut agency);
    recent_edit("projects", "p-2", &mut agency);
    recent_edit("profiles", "op-1", &mut agency);
    let pending = agency.detect()?;
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().flat_map(|c| &c.suggestions).all(|s| s.confidence >= 0.7));

    let scope = agency.scope.clone();
    let result = agency
        .engine
        .auto_resolve_conflicts(&scope, &ResolutionStrategy::Merge { threshold: 0.7 })?;
    assert_eq!(result.resolved_count, 3);
    assert_eq!(result.skipped, vec![]);

    let stats = agency.engine.get_stats(&scope)?;
    assert_eq!((stats.pending, stats.resolved, stats.total), (0, 3, 3));
    Ok(())
}

#[test]
fn failing_conflict_is_skipped_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    recent_edit("projects", "p-1", &mut agency);
    untimed_edit("projects", "p-2", &mut agency);
    recent_edit("projects", "p-3", &mut agency);
    agency.detect()?;
    let stuck = agency.pending_for(&key("projects", "p-2"))?.ok_or("missing p-2")?;

    let scope = agency.scope.clone();
    let result = agency
        .engine
        .auto_resolve_conflicts(&scope, &ResolutionStrategy::LastWriteWins)?;
    assert_eq!(result.resolved_count, 2);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].conflict_id, stuck.id);
    assert!(result.skipped[0].reason.contains("no usable timestamp"), "{}", result.skipped[0].reason);

    let stored = agency.engine.get_conflict(stuck.id)?.ok_or("missing")?;
    assert_eq!(stored.status, ConflictStatus::Pending);
    Ok(())
}

#[test]
fn manual_is_not_batchable() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    recent_edit("projects", "p-1", &mut agency);
    agency.detect()?;

    let scope = agency.scope.clone();
    let err = agency
        .engine
        .auto_resolve_conflicts(
            &scope,
            &ResolutionStrategy::Manual {
                resolved_data: fields(vec![("status", "active".into())]),
            },
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::StrategyNotBatchable("manual")), "{err:?}");
    assert_eq!(agency.engine.get_stats(&scope)?.pending, 1);
    Ok(())
}

#[test]
fn batch_over_empty_scope_is_empty() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    let scope = agency.scope.clone();
    let result = agency
        .engine
        .auto_resolve_conflicts(&scope, &ResolutionStrategy::LastWriteWins)?;
    assert_eq!(result.resolved_count, 0);
    assert!(result.skipped.is_empty());
    Ok(())
}

// ============================================================================
// Stats & audit
// ============================================================================

#[test]
fn stats_total_is_always_pending_plus_resolved() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    let scope = agency.scope.clone();
    let check = |agency: &TestAgency| -> Result<(), Box<dyn std::error::Error>> {
        let stats = agency.engine.get_stats(&agency.scope)?;
        assert_eq!(stats.total, stats.pending + stats.resolved);
        Ok(())
    };

    check(&agency)?;
    recent_edit("projects", "p-1", &mut agency);
    untimed_edit("projects", "p-2", &mut agency);
    recent_edit("profiles", "op-1", &mut agency);
    agency.detect()?;
    check(&agency)?;

    agency
        .engine
        .auto_resolve_conflicts(&scope, &ResolutionStrategy::LastWriteWins)?;
    check(&agency)?;

    let report = agency.engine.stats_report(&scope)?;
    assert_eq!(report.overall.total, 3);
    assert_eq!(report.by_table["projects"].pending, 1);
    assert_eq!(report.by_table["projects"].resolved, 1);
    assert_eq!(report.by_table["profiles"].resolved, 1);
    Ok(())
}

#[test]
fn archived_conflicts_leave_history_but_stay_counted() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    recent_edit("projects", "p-1", &mut agency);
    recent_edit("projects", "p-2", &mut agency);
    agency.detect()?;

    let scope = agency.scope.clone();
    agency
        .engine
        .auto_resolve_conflicts(&scope, &ResolutionStrategy::LastWriteWins)?;
    assert_eq!(agency.engine.resolution_history(&scope)?.len(), 2);

    let cutoff = agency.engine.now()?;
    assert_eq!(agency.engine.archive_resolved(&scope, cutoff)?, 2);
    assert!(agency.engine.resolution_history(&scope)?.is_empty());
    assert_eq!(agency.engine.get_stats(&scope)?.resolved, 2);

    // Nothing left to archive.
    let cutoff = agency.engine.now()?;
    assert_eq!(agency.engine.archive_resolved(&scope, cutoff)?, 0);
    Ok(())
}
