use regsync_core::{
    ConflictData, EngineConfig, FieldMap, FieldValue, RecordKey, RecordSnapshots, Scope, Snapshot,
};
use regsync_engine::{ConflictEngine, EngineError};
use regsync_storage::{SqliteStorage, StorageError};

use crate::InMemorySnapshotProvider;

/// One agency's conflict engine over an in-memory store.
pub struct TestAgency {
    pub scope: Scope,
    pub engine: ConflictEngine<InMemorySnapshotProvider>,
}

impl TestAgency {
    pub fn new(scope: &str) -> Result<Self, EngineError> {
        Self::with_config(scope, EngineConfig::default())
    }

    pub fn with_config(scope: &str, config: EngineConfig) -> Result<Self, EngineError> {
        let storage = SqliteStorage::open_in_memory().map_err(EngineError::from)?;
        Ok(Self {
            scope: Scope::new(scope),
            engine: ConflictEngine::new(config, storage, InMemorySnapshotProvider::new())?,
        })
    }

    pub fn put(&mut self, key: &RecordKey, snapshots: RecordSnapshots) {
        let scope = self.scope.clone();
        self.engine
            .provider_mut()
            .set_record(&scope, key.clone(), snapshots);
    }

    pub fn detect(&mut self) -> Result<Vec<ConflictData>, EngineError> {
        let scope = self.scope.clone();
        self.engine.detect_conflicts(&scope)
    }

    /// The single pending conflict for `key`.
    pub fn pending_for(&self, key: &RecordKey) -> Result<Option<ConflictData>, EngineError> {
        Ok(self
            .engine
            .list_pending(&self.scope)?
            .into_iter()
            .find(|c| &c.record_key() == key))
    }
}

/// Open a file-backed store, for tests that share one database between engines.
pub fn open_shared(path: &std::path::Path) -> Result<SqliteStorage, StorageError> {
    SqliteStorage::open(&path.to_string_lossy())
}

pub fn fields(pairs: Vec<(&str, FieldValue)>) -> FieldMap {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

pub fn snapshot(pairs: Vec<(&str, FieldValue)>) -> Snapshot {
    Snapshot::new(fields(pairs))
}

pub fn key(table: &str, id: &str) -> RecordKey {
    RecordKey::new(table, id)
}
