use std::collections::BTreeMap;

use regsync_core::{ConflictStats, Scope};
use regsync_storage::ConflictStorage;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsReport {
    pub overall: ConflictStats,
    pub by_table: BTreeMap<String, ConflictStats>,
}

/// Read-only view over a store; holds no counters of its own.
pub struct StatsAggregator<'a, S: ConflictStorage> {
    storage: &'a S,
}

impl<'a, S: ConflictStorage> StatsAggregator<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    pub fn stats(&self, scope: &Scope) -> Result<ConflictStats, EngineError> {
        Ok(self.storage.stats(scope)?)
    }

    pub fn report(&self, scope: &Scope) -> Result<StatsReport, EngineError> {
        Ok(StatsReport {
            overall: self.storage.stats(scope)?,
            by_table: self.storage.stats_by_table(scope)?,
        })
    }
}
