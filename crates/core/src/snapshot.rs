use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::field_value::FieldValue;
use crate::CoreError;

pub type FieldMap = BTreeMap<String, FieldValue>;

/// One side's full view of a record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub fields: FieldMap,
    /// Explicit last-modified time (Unix ms) when the provider knows it.
    pub modified_at: Option<i64>,
}

impl Snapshot {
    pub fn new(fields: FieldMap) -> Self {
        Self {
            fields,
            modified_at: None,
        }
    }

    pub fn with_modified_at(mut self, modified_at: i64) -> Self {
        self.modified_at = Some(modified_at);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Last-modified time: the explicit one, else the configured timestamp field.
    pub fn effective_modified_at(&self, config: &EngineConfig) -> Option<i64> {
        self.modified_at
            .or_else(|| self.fields.get(&config.timestamp_field).and_then(parse_timestamp))
    }

    pub fn content_fields<'a>(&'a self, config: &'a EngineConfig) -> BTreeSet<&'a str> {
        self.fields
            .keys()
            .map(String::as_str)
            .filter(|key| !config.is_metadata(key))
            .collect()
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

fn parse_timestamp(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Timestamp(ms) | FieldValue::Integer(ms) => Some(*ms),
        FieldValue::Text(raw) => chrono::DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

/// Both sides of one record as returned by the snapshot provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshots {
    pub source: Snapshot,
    pub target: Snapshot,
    /// Last common sync point (Unix ms), if known.
    pub baseline: Option<i64>,
}

impl RecordSnapshots {
    pub fn new(source: Snapshot, target: Snapshot) -> Self {
        Self {
            source,
            target,
            baseline: None,
        }
    }

    pub fn with_baseline(mut self, baseline: i64) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Hash of both sides' non-metadata fields. Equal fingerprints mean no
    /// content changed on either side; metadata and `modified_at` are ignored.
    pub fn fingerprint(&self, config: &EngineConfig) -> Result<[u8; 32], CoreError> {
        let mut hasher = blake3::Hasher::new();
        for (label, side) in [(&b"source"[..], &self.source), (&b"target"[..], &self.target)] {
            let content: BTreeMap<&str, &FieldValue> = side
                .fields
                .iter()
                .filter(|(key, _)| !config.is_metadata(key))
                .map(|(key, value)| (key.as_str(), value))
                .collect();
            let bytes =
                rmp_serde::to_vec(&content).map_err(|e| CoreError::Serialization(e.to_string()))?;
            hasher.update(label);
            hasher.update(&bytes);
        }
        Ok(*hasher.finalize().as_bytes())
    }
}
