use serde::{Deserialize, Serialize};

use crate::field_value::FieldValue;
use crate::hlc::Hlc;
use crate::ids::{ConflictId, RecordKey, Scope};
use crate::snapshot::{FieldMap, Snapshot};
use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    TimestampConflict,
    DataMismatch,
    SchemaConflict,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimestampConflict => "timestamp_conflict",
            Self::DataMismatch => "data_mismatch",
            Self::SchemaConflict => "schema_conflict",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "timestamp_conflict" => Ok(Self::TimestampConflict),
            "data_mismatch" => Ok(Self::DataMismatch),
            "schema_conflict" => Ok(Self::SchemaConflict),
            _ => Err(CoreError::InvalidData(format!("unknown conflict type: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            _ => Err(CoreError::InvalidData(format!("unknown conflict status: {s}"))),
        }
    }
}

/// Which signal drove a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuggestionSignal {
    Recency,
    NonEmpty,
    Ambiguous,
}

impl SuggestionSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recency => "recency",
            Self::NonEmpty => "non_empty",
            Self::Ambiguous => "ambiguous",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "recency" => Ok(Self::Recency),
            "non_empty" => Ok(Self::NonEmpty),
            "ambiguous" => Ok(Self::Ambiguous),
            _ => Err(CoreError::InvalidData(format!("unknown suggestion signal: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSuggestion {
    pub field: String,
    /// `None` when the field is absent on that side.
    pub source_value: Option<FieldValue>,
    pub target_value: Option<FieldValue>,
    pub recommended_value: Option<FieldValue>,
    pub confidence: f64,
    pub signal: SuggestionSignal,
    pub reason: String,
}

/// Strategy requested by a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionStrategy {
    LastWriteWins,
    Merge { threshold: f64 },
    Manual { resolved_data: FieldMap },
}

impl ResolutionStrategy {
    pub fn kind(&self) -> ResolvedStrategy {
        match self {
            Self::LastWriteWins => ResolvedStrategy::LastWriteWins,
            Self::Merge { .. } => ResolvedStrategy::Merge,
            Self::Manual { .. } => ResolvedStrategy::Manual,
        }
    }
}

/// Strategy recorded on a resolved conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolvedStrategy {
    LastWriteWins,
    Merge,
    Manual,
    /// Closed by a refresh pass after both sides converged.
    AutoClosed,
}

impl ResolvedStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastWriteWins => "last_write_wins",
            Self::Merge => "merge",
            Self::Manual => "manual",
            Self::AutoClosed => "auto_closed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "last_write_wins" => Ok(Self::LastWriteWins),
            "merge" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            "auto_closed" => Ok(Self::AutoClosed),
            _ => Err(CoreError::InvalidData(format!("unknown resolution strategy: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictData {
    pub id: ConflictId,
    pub scope: Scope,
    pub table_name: String,
    pub record_id: String,
    pub conflict_type: ConflictType,
    pub source_data: Snapshot,
    pub target_data: Snapshot,
    /// Last common sync point observed at detection.
    pub baseline: Option<i64>,
    pub suggestions: Vec<FieldSuggestion>,
    pub status: ConflictStatus,
    pub detected_at: Hlc,
    pub resolved_data: Option<FieldMap>,
    pub resolved_strategy: Option<ResolvedStrategy>,
    pub resolved_at: Option<Hlc>,
    pub archived_at: Option<Hlc>,
}

impl ConflictData {
    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.table_name.clone(), self.record_id.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.status == ConflictStatus::Pending
    }

    pub fn suggestion(&self, field: &str) -> Option<&FieldSuggestion> {
        self.suggestions.iter().find(|s| s.field == field)
    }
}

/// Derived pending/resolved counts for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictStats {
    pub pending: u64,
    pub resolved: u64,
    pub total: u64,
}

impl ConflictStats {
    pub fn new(pending: u64, resolved: u64) -> Self {
        Self {
            pending,
            resolved,
            total: pending + resolved,
        }
    }
}
