use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -32000;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, unixepoch());

CREATE TABLE IF NOT EXISTS conflicts (
    conflict_id BLOB PRIMARY KEY CHECK (length(conflict_id) = 16),
    scope TEXT NOT NULL,
    table_name TEXT NOT NULL,
    record_id TEXT NOT NULL,
    conflict_type TEXT NOT NULL
        CHECK (conflict_type IN ('timestamp_conflict', 'data_mismatch', 'schema_conflict')),
    source_data BLOB NOT NULL,
    target_data BLOB NOT NULL,
    baseline INTEGER,
    fingerprint BLOB NOT NULL CHECK (length(fingerprint) = 32),
    status TEXT NOT NULL CHECK (status IN ('pending', 'resolved')),
    detected_at BLOB NOT NULL CHECK (length(detected_at) = 12),
    refreshed_at BLOB NOT NULL CHECK (length(refreshed_at) = 12),
    resolved_data BLOB,
    resolved_strategy TEXT,
    resolved_at BLOB CHECK (resolved_at IS NULL OR length(resolved_at) = 12),
    archived_at BLOB CHECK (archived_at IS NULL OR length(archived_at) = 12),
    CHECK ((status = 'resolved') = (resolved_data IS NOT NULL AND resolved_strategy IS NOT NULL AND resolved_at IS NOT NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_conflicts_one_pending
    ON conflicts (scope, table_name, record_id) WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_conflicts_scope_status ON conflicts (scope, status, detected_at);
CREATE INDEX IF NOT EXISTS idx_conflicts_record ON conflicts (scope, table_name, record_id, detected_at);

CREATE TABLE IF NOT EXISTS conflict_suggestions (
    conflict_id BLOB NOT NULL REFERENCES conflicts (conflict_id),
    position INTEGER NOT NULL,
    field TEXT NOT NULL,
    source_value BLOB,
    target_value BLOB,
    recommended_value BLOB,
    confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
    signal TEXT NOT NULL,
    reason TEXT NOT NULL,
    PRIMARY KEY (conflict_id, position)
);
";
