//! Computes the final record for a conflict under a chosen strategy.
//!
//! Pure: nothing here touches storage. The `pending -> resolved` transition
//! is performed by the store once a [`Resolution`] has been computed.

use regsync_core::{ConflictData, EngineConfig, FieldMap, ResolutionStrategy, ResolvedStrategy};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub data: FieldMap,
    pub strategy: ResolvedStrategy,
    /// Fields whose recommended value was adopted. Empty for non-merge strategies.
    pub adopted: Vec<String>,
}

pub fn execute(
    conflict: &ConflictData,
    strategy: &ResolutionStrategy,
    config: &EngineConfig,
) -> Result<Resolution, EngineError> {
    match strategy {
        ResolutionStrategy::LastWriteWins => last_write_wins(conflict, config),
        ResolutionStrategy::Merge { threshold } => merge(conflict, *threshold),
        ResolutionStrategy::Manual { resolved_data } => manual(conflict, resolved_data, config),
    }
}

/// Whole newer snapshot. Ties go to the target.
fn last_write_wins(
    conflict: &ConflictData,
    config: &EngineConfig,
) -> Result<Resolution, EngineError> {
    let source = conflict.source_data.effective_modified_at(config);
    let target = conflict.target_data.effective_modified_at(config);
    let (Some(source), Some(target)) = (source, target) else {
        return Err(EngineError::NoTimestampAvailable(conflict.id.to_string()));
    };

    let winner = if source > target {
        &conflict.source_data
    } else {
        &conflict.target_data
    };
    Ok(Resolution {
        data: winner.fields.clone(),
        strategy: ResolvedStrategy::LastWriteWins,
        adopted: Vec::new(),
    })
}

/// Target, overlaid with every recommendation at or above `threshold`.
///
/// Fields that exist only on the source side are not introduced; the
/// resolved record keeps the target's field set.
fn merge(conflict: &ConflictData, threshold: f64) -> Result<Resolution, EngineError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(EngineError::InvalidThreshold(threshold));
    }

    let mut data = conflict.target_data.fields.clone();
    let mut adopted = Vec::new();
    for suggestion in &conflict.suggestions {
        if suggestion.confidence < threshold || !data.contains_key(&suggestion.field) {
            continue;
        }
        if let Some(value) = &suggestion.recommended_value {
            data.insert(suggestion.field.clone(), value.clone());
            adopted.push(suggestion.field.clone());
        }
    }

    Ok(Resolution {
        data,
        strategy: ResolvedStrategy::Merge,
        adopted,
    })
}

fn manual(
    conflict: &ConflictData,
    resolved_data: &FieldMap,
    config: &EngineConfig,
) -> Result<Resolution, EngineError> {
    let target = &conflict.target_data.fields;

    let missing: Vec<String> = target
        .keys()
        .filter(|field| !config.is_metadata(field) && !resolved_data.contains_key(*field))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::IncompleteResolution {
            conflict_id: conflict.id.to_string(),
            missing,
        });
    }

    let unexpected: Vec<String> = resolved_data
        .keys()
        .filter(|field| !config.is_metadata(field) && !target.contains_key(*field))
        .cloned()
        .collect();
    if !unexpected.is_empty() {
        return Err(EngineError::UnexpectedFields {
            conflict_id: conflict.id.to_string(),
            fields: unexpected,
        });
    }

    let mut data = resolved_data.clone();
    for (field, value) in target {
        if config.is_metadata(field) {
            data.entry(field.clone()).or_insert_with(|| value.clone());
        }
    }

    Ok(Resolution {
        data,
        strategy: ResolvedStrategy::Manual,
        adopted: Vec::new(),
    })
}
