use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("conflict already resolved with different data: {conflict_id}")]
    AlreadyResolved { conflict_id: String },

    #[error("conflict {conflict_id} changed since it was read")]
    ConflictChanged { conflict_id: String },

    #[error("core error: {0}")]
    Core(#[from] regsync_core::CoreError),
}

impl StorageError {
    /// Lock contention that may clear on a second attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
