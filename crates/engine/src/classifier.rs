use std::collections::BTreeSet;

use regsync_core::{ConflictType, EngineConfig, FieldSuggestion, RecordSnapshots};

use crate::suggestion::{self, SideTimes};

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub conflict_type: ConflictType,
    /// One per disagreeing field, ordered by field name.
    pub suggestions: Vec<FieldSuggestion>,
    pub times: SideTimes,
}

pub fn side_times(snapshots: &RecordSnapshots, config: &EngineConfig) -> SideTimes {
    SideTimes {
        source: snapshots.source.effective_modified_at(config),
        target: snapshots.target.effective_modified_at(config),
    }
}

/// Non-metadata fields whose values differ, absent and present counting as different.
pub fn disagreeing_fields<'a>(
    snapshots: &'a RecordSnapshots,
    config: &'a EngineConfig,
) -> Vec<&'a str> {
    let source_fields = snapshots.source.content_fields(config);
    let target_fields = snapshots.target.content_fields(config);
    source_fields
        .union(&target_fields)
        .copied()
        .filter(|field| snapshots.source.get(field) != snapshots.target.get(field))
        .collect()
}

/// Decide whether two snapshots of a record conflict and why.
///
/// Returns `None` when every non-metadata field is deeply equal.
pub fn classify(snapshots: &RecordSnapshots, config: &EngineConfig) -> Option<Classification> {
    let fields = disagreeing_fields(snapshots, config);
    if fields.is_empty() {
        return None;
    }

    let times = side_times(snapshots, config);
    let source_set: BTreeSet<&str> = snapshots.source.content_fields(config);
    let target_set: BTreeSet<&str> = snapshots.target.content_fields(config);
    let baseline = snapshots.baseline.unwrap_or(0);

    let conflict_type = if source_set != target_set {
        ConflictType::SchemaConflict
    } else if matches!(
        (times.source, times.target),
        (Some(s), Some(t)) if s > baseline && t > baseline
    ) {
        ConflictType::TimestampConflict
    } else {
        ConflictType::DataMismatch
    };

    let suggestions = fields
        .into_iter()
        .map(|field| {
            suggestion::suggest(
                field,
                snapshots.source.get(field),
                snapshots.target.get(field),
                times,
                &config.suggestion,
            )
        })
        .collect();

    Some(Classification {
        conflict_type,
        suggestions,
        times,
    })
}
