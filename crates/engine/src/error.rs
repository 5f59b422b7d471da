use regsync_core::CoreError;
use regsync_storage::StorageError;
use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("snapshot provider error: {0}")]
    Provider(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("conflict not found: {0}")]
    ConflictNotFound(String),

    #[error("conflict already resolved with different data: {0}")]
    AlreadyResolved(String),

    #[error("conflict changed while resolving, read it again and retry: {0}")]
    ConflictChanged(String),

    #[error("no usable timestamp on both sides of conflict {0}")]
    NoTimestampAvailable(String),

    #[error("manual resolution of {conflict_id} is missing fields: {}", .missing.join(", "))]
    IncompleteResolution {
        conflict_id: String,
        missing: Vec<String>,
    },

    #[error("manual resolution of {conflict_id} adds fields absent from target: {}", .fields.join(", "))]
    UnexpectedFields {
        conflict_id: String,
        fields: Vec<String>,
    },

    #[error("strategy {0} cannot be used for batch resolution")]
    StrategyNotBatchable(&'static str),

    #[error("merge threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AlreadyResolved { conflict_id } => Self::AlreadyResolved(conflict_id),
            StorageError::NotFound(id) => Self::ConflictNotFound(id),
            StorageError::ConflictChanged { conflict_id } => Self::ConflictChanged(conflict_id),
            other => Self::Storage(other),
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RecordNotFound(key) => Self::RecordNotFound(key.to_string()),
            other => Self::Provider(other.to_string()),
        }
    }
}

impl EngineError {
    /// Store lock contention; the operation may succeed if run again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_transient())
    }
}
