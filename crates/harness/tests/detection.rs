use pretty_assertions::assert_eq;
use regsync_core::{ConflictStatus, ConflictType, FieldValue, RecordSnapshots, ResolvedStrategy, SuggestionSignal};
use regsync_harness::{TestAgency, init_tracing, key, snapshot};

const T0: i64 = 1_700_000_000_000;
const HOUR: i64 = 3_600_000;

fn status_pair(source: &str, target: &str, source_at: i64, target_at: i64) -> RecordSnapshots {
    RecordSnapshots::new(
        snapshot(vec![
            ("status", source.into()),
            ("updated_at", FieldValue::Timestamp(source_at)),
        ]),
        snapshot(vec![
            ("status", target.into()),
            ("updated_at", FieldValue::Timestamp(target_at)),
        ]),
    )
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn newer_target_is_timestamp_conflict() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut agency = TestAgency::new("agency-a")?;
    let record = key("projects", "p-1");
    agency.put(&record, status_pair("active", "inactive", T0, T0 + 2 * HOUR));

    let conflicts = agency.detect()?;
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::TimestampConflict);
    assert_eq!(conflict.status, ConflictStatus::Pending);
    assert_eq!(conflict.record_key(), record);

    let status = conflict.suggestion("status").ok_or("missing status suggestion")?;
    assert_eq!(status.recommended_value, Some("inactive".into()));
    assert!(status.confidence > 0.8, "confidence {}", status.confidence);
    assert_eq!(status.signal, SuggestionSignal::Recency);
    assert!(status.reason.contains("recency"));

    // Metadata fields never get a suggestion of their own.
    assert!(conflict.suggestion("updated_at").is_none());
    Ok(())
}

#[test]
fn identical_record_yields_no_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    let nested = FieldValue::List(vec!["2G".into(), "4G".into()]);
    let same = snapshot(vec![("name", "Tower 7".into()), ("bands", nested)]);
    agency.put(&key("sites", "s-7"), RecordSnapshots::new(same.clone(), same));

    assert!(agency.detect()?.is_empty());
    let scope = agency.scope.clone();
    assert_eq!(agency.engine.get_stats(&scope)?.total, 0);
    Ok(())
}

#[test]
fn field_set_difference_is_schema_conflict() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    agency.put(
        &key("profiles", "op-3"),
        RecordSnapshots::new(
            snapshot(vec![("name", "Telco".into()), ("license_no", "L-77".into())]),
            snapshot(vec![("name", "Telco".into())]),
        ),
    );

    let conflicts = agency.detect()?;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].conflict_type, ConflictType::SchemaConflict);
    let s = conflicts[0].suggestion("license_no").ok_or("missing suggestion")?;
    assert_eq!(s.target_value, None);
    assert_eq!(s.signal, SuggestionSignal::NonEmpty);
    Ok(())
}

#[test]
fn pending_conflicts_always_carry_suggestions() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    agency.put(&key("projects", "p-1"), status_pair("a", "b", T0, T0));
    agency.put(
        &key("projects", "p-2"),
        RecordSnapshots::new(
            snapshot(vec![("budget", 100.into())]),
            snapshot(vec![("budget", 250.into())]),
        ),
    );
    agency.put(
        &key("config", "c-1"),
        RecordSnapshots::new(snapshot(vec![("note", FieldValue::Null)]), snapshot(vec![("note", "x".into())])),
    );

    let conflicts = agency.detect()?;
    assert_eq!(conflicts.len(), 3);
    for conflict in &conflicts {
        assert!(!conflict.suggestions.is_empty());
        for s in &conflict.suggestions {
            assert!((0.0..=1.0).contains(&s.confidence), "{s:?}");
            assert!(!s.reason.is_empty());
        }
    }
    Ok(())
}

// ============================================================================
// Refresh reconciliation
// ============================================================================

#[test]
fn redetection_updates_existing_entry() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    let record = key("projects", "p-1");
    agency.put(&record, status_pair("active", "inactive", T0, T0 + 2 * HOUR));
    let first = agency.detect()?;

    // Unchanged snapshots leave the entry alone.
    let scope = agency.scope.clone();
    let report = agency.engine.refresh(&scope)?;
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.created, 0);

    // A new edit on the target updates the same entry in place.
    agency.put(&record, status_pair("active", "suspended", T0, T0 + 3 * HOUR));
    let report = agency.engine.refresh(&scope)?;
    assert_eq!(report.updated, 1);

    let pending = agency.engine.list_pending(&scope)?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, first[0].id);
    assert_eq!(pending[0].detected_at, first[0].detected_at);
    assert_eq!(
        pending[0].suggestion("status").and_then(|s| s.recommended_value.clone()),
        Some("suspended".into())
    );
    Ok(())
}

#[test]
fn converged_record_is_auto_closed() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    let record = key("projects", "p-1");
    agency.put(&record, status_pair("active", "inactive", T0, T0 + 2 * HOUR));
    let conflict_id = agency.detect()?[0].id;

    agency.put(&record, status_pair("inactive", "inactive", T0 + 3 * HOUR, T0 + 2 * HOUR));
    let scope = agency.scope.clone();
    let report = agency.engine.refresh(&scope)?;
    assert_eq!(report.auto_closed, 1);

    let closed = agency.engine.get_conflict(conflict_id)?.ok_or("conflict vanished")?;
    assert_eq!(closed.status, ConflictStatus::Resolved);
    assert_eq!(closed.resolved_strategy, Some(ResolvedStrategy::AutoClosed));
    let expected = snapshot(vec![
        ("status", "inactive".into()),
        ("updated_at", FieldValue::Timestamp(T0 + 2 * HOUR)),
    ]);
    assert_eq!(closed.resolved_data, Some(expected.fields));

    let stats = agency.engine.get_stats(&scope)?;
    assert_eq!((stats.pending, stats.resolved, stats.total), (0, 1, 1));
    Ok(())
}

#[test]
fn resolved_conflict_is_not_resurrected() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    let record = key("projects", "p-1");
    agency.put(&record, status_pair("active", "inactive", T0, T0 + 2 * HOUR));
    let conflict_id = agency.detect()?[0].id;
    agency
        .engine
        .resolve_conflict(conflict_id, &regsync_core::ResolutionStrategy::LastWriteWins)?;

    // The resolution has not reached the record store yet.
    let scope = agency.scope.clone();
    let report = agency.engine.refresh(&scope)?;
    assert_eq!(report.awaiting_propagation, 1);
    assert_eq!(report.created, 0);
    assert!(agency.engine.list_pending(&scope)?.is_empty());

    // A fresh edit afterwards is a new disagreement with a new id.
    agency.put(&record, status_pair("closed", "inactive", T0 + 5 * HOUR, T0 + 2 * HOUR));
    let pending = agency.detect()?;
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].id, conflict_id);

    let stats = agency.engine.get_stats(&scope)?;
    assert_eq!((stats.pending, stats.resolved), (1, 1));
    Ok(())
}

#[test]
fn metadata_only_change_keeps_resolution() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    let record = key("projects", "p-1");
    agency.put(&record, status_pair("active", "inactive", T0, T0 + 2 * HOUR));
    let conflict_id = agency.detect()?[0].id;
    agency
        .engine
        .resolve_conflict(conflict_id, &regsync_core::ResolutionStrategy::LastWriteWins)?;

    // A sync pass touches bookkeeping fields only.
    agency.put(
        &record,
        RecordSnapshots::new(
            snapshot(vec![
                ("status", "active".into()),
                ("updated_at", FieldValue::Timestamp(T0 + HOUR)),
                ("last_synced_at", FieldValue::Timestamp(T0 + 4 * HOUR)),
            ]),
            snapshot(vec![
                ("status", "inactive".into()),
                ("updated_at", FieldValue::Timestamp(T0 + 2 * HOUR)),
            ]),
        ),
    );
    let scope = agency.scope.clone();
    let report = agency.engine.refresh(&scope)?;
    assert_eq!(report.awaiting_propagation, 1);
    assert_eq!(report.created, 0);
    assert!(agency.engine.list_pending(&scope)?.is_empty());

    let stats = agency.engine.get_stats(&scope)?;
    assert_eq!((stats.pending, stats.resolved, stats.total), (0, 1, 1));
    Ok(())
}

#[test]
fn missing_record_is_skipped_and_scan_continues() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    let gone = key("projects", "p-gone");
    let locked = key("projects", "p-locked");
    let live = key("projects", "p-live");
    agency.put(&gone, status_pair("a", "b", T0, T0));
    agency.put(&locked, status_pair("a", "b", T0, T0));
    agency.put(&live, status_pair("a", "b", T0, T0));

    let scope = agency.scope.clone();
    agency.engine.provider_mut().orphan(&scope, &gone);
    agency.engine.provider_mut().fail(locked.clone());

    let report = agency.engine.refresh(&scope)?;
    assert_eq!(report.created, 1);
    let skipped: Vec<_> = report.skipped.iter().map(|s| s.key.clone()).collect();
    assert_eq!(skipped, vec![gone.clone(), locked.clone()]);
    assert!(report.skipped[0].reason.contains("record not found"));
    assert!(report.skipped[1].reason.contains("unavailable"));

    agency.engine.provider_mut().heal(&locked);
    let report = agency.engine.refresh(&scope)?;
    assert_eq!(report.created, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.skipped.len(), 1);
    Ok(())
}

#[test]
fn scopes_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
    let mut agency = TestAgency::new("agency-a")?;
    let other = regsync_core::Scope::new("agency-b");
    agency
        .engine
        .provider_mut()
        .set_record(&other, key("projects", "p-1"), status_pair("a", "b", T0, T0));

    assert!(agency.detect()?.is_empty());
    assert_eq!(agency.engine.detect_conflicts(&other)?.len(), 1);
    assert_eq!(agency.engine.get_stats(&agency.scope.clone())?.total, 0);
    Ok(())
}
