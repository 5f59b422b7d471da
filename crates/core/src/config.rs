//! Engine tuning.
//!
//! Every scoring constant lives here rather than in the scorer so operators
//! can retune recommendations per deployment. Missing keys fall back to the
//! defaults below.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::CoreError;

pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_TIMESTAMP_FIELD: &str = "updated_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SuggestionConfig {
    /// Timestamp gaps at or below this are treated as simultaneous.
    pub recency_tolerance_ms: i64,
    /// Gap at which recency confidence reaches `recency_ceiling`.
    pub recency_horizon_ms: i64,
    pub recency_floor: f64,
    pub recency_ceiling: f64,
    pub non_empty_confidence: f64,
    pub ambiguous_confidence: f64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            recency_tolerance_ms: 1_000,
            recency_horizon_ms: 3_600_000,
            recency_floor: 0.5,
            recency_ceiling: 0.99,
            non_empty_confidence: 0.9,
            ambiguous_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub suggestion: SuggestionConfig,
    /// Default threshold for the `merge` strategy.
    pub merge_threshold: f64,
    /// Field consulted when a snapshot has no explicit last-modified time.
    pub timestamp_field: String,
    /// Bookkeeping fields ignored when comparing snapshots.
    pub metadata_fields: BTreeSet<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            suggestion: SuggestionConfig::default(),
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
            metadata_fields: ["updated_at", "created_at", "last_synced_at"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, CoreError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::ReadConfig {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn is_metadata(&self, field: &str) -> bool {
        self.metadata_fields.contains(field)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let s = &self.suggestion;
        for (name, value) in [
            ("merge_threshold", self.merge_threshold),
            ("suggestion.recency_floor", s.recency_floor),
            ("suggestion.recency_ceiling", s.recency_ceiling),
            ("suggestion.non_empty_confidence", s.non_empty_confidence),
            ("suggestion.ambiguous_confidence", s.ambiguous_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if s.recency_floor > s.recency_ceiling {
            return Err(CoreError::InvalidConfig(
                "suggestion.recency_floor must not exceed recency_ceiling".into(),
            ));
        }
        if s.recency_tolerance_ms < 0 {
            return Err(CoreError::InvalidConfig(
                "suggestion.recency_tolerance_ms must not be negative".into(),
            ));
        }
        if s.recency_horizon_ms <= s.recency_tolerance_ms {
            return Err(CoreError::InvalidConfig(
                "suggestion.recency_horizon_ms must exceed recency_tolerance_ms".into(),
            ));
        }
        if self.timestamp_field.trim().is_empty() {
            return Err(CoreError::InvalidConfig("timestamp_field must not be empty".into()));
        }
        Ok(())
    }
}
