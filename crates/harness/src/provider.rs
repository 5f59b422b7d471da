use std::collections::{BTreeMap, BTreeSet};

use regsync_core::{RecordKey, RecordSnapshots, Scope, Snapshot};
use regsync_engine::{ProviderError, SnapshotProvider};

/// Snapshot provider backed by in-process maps, with failure injection.
#[derive(Debug, Default)]
pub struct InMemorySnapshotProvider {
    records: BTreeMap<Scope, BTreeMap<RecordKey, RecordSnapshots>>,
    /// Keys listed for a scope whose snapshots are gone.
    dangling: BTreeMap<Scope, BTreeSet<RecordKey>>,
    unavailable: BTreeSet<RecordKey>,
}

impl InMemorySnapshotProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_record(&mut self, scope: &Scope, key: RecordKey, snapshots: RecordSnapshots) {
        self.records
            .entry(scope.clone())
            .or_default()
            .insert(key, snapshots);
    }

    /// Overwrite the target side only, as a propagated write would.
    pub fn set_target(&mut self, scope: &Scope, key: &RecordKey, target: Snapshot) {
        if let Some(snapshots) = self
            .records
            .get_mut(scope)
            .and_then(|records| records.get_mut(key))
        {
            snapshots.target = target;
        }
    }

    pub fn remove(&mut self, scope: &Scope, key: &RecordKey) {
        if let Some(records) = self.records.get_mut(scope) {
            records.remove(key);
        }
    }

    /// Keep listing `key` but fail to fetch it, like a record deleted mid-scan.
    pub fn orphan(&mut self, scope: &Scope, key: &RecordKey) {
        self.remove(scope, key);
        self.dangling
            .entry(scope.clone())
            .or_default()
            .insert(key.clone());
    }

    pub fn fail(&mut self, key: RecordKey) {
        self.unavailable.insert(key);
    }

    pub fn heal(&mut self, key: &RecordKey) {
        self.unavailable.remove(key);
    }
}

impl SnapshotProvider for InMemorySnapshotProvider {
    fn list_records(&self, scope: &Scope) -> Result<Vec<RecordKey>, ProviderError> {
        let mut keys: BTreeSet<RecordKey> = self
            .records
            .get(scope)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();
        if let Some(dangling) = self.dangling.get(scope) {
            keys.extend(dangling.iter().cloned());
        }
        Ok(keys.into_iter().collect())
    }

    fn fetch_snapshots(
        &self,
        scope: &Scope,
        key: &RecordKey,
    ) -> Result<RecordSnapshots, ProviderError> {
        if self.unavailable.contains(key) {
            return Err(ProviderError::Unavailable(format!("{key} is locked upstream")));
        }
        self.records
            .get(scope)
            .and_then(|records| records.get(key))
            .cloned()
            .ok_or_else(|| ProviderError::RecordNotFound(key.clone()))
    }
}
