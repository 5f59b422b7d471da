//! Seam to the record store that holds both copies of every record.

use regsync_core::{RecordKey, RecordSnapshots, Scope};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("record not found: {0}")]
    RecordNotFound(RecordKey),

    #[error("snapshot source unavailable: {0}")]
    Unavailable(String),
}

/// Supplies the current source and target snapshots for records in a scope.
pub trait SnapshotProvider {
    /// Records the provider tracks for `scope`.
    fn list_records(&self, scope: &Scope) -> Result<Vec<RecordKey>, ProviderError>;

    fn fetch_snapshots(
        &self,
        scope: &Scope,
        key: &RecordKey,
    ) -> Result<RecordSnapshots, ProviderError>;
}

impl<P: SnapshotProvider + ?Sized> SnapshotProvider for &P {
    fn list_records(&self, scope: &Scope) -> Result<Vec<RecordKey>, ProviderError> {
        (**self).list_records(scope)
    }

    fn fetch_snapshots(
        &self,
        scope: &Scope,
        key: &RecordKey,
    ) -> Result<RecordSnapshots, ProviderError> {
        (**self).fetch_snapshots(scope, key)
    }
}
