use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension};

use regsync_core::{
    ConflictData, ConflictId, ConflictStats, ConflictStatus, ConflictType, FieldMap,
    FieldSuggestion, FieldValue, Hlc, RecordKey, ResolvedStrategy, Scope, Snapshot,
    SuggestionSignal,
};

use crate::error::StorageError;
use crate::traits::{ConflictStorage, RecordConflictHead, ResolveOutcome, UpsertOutcome};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn encode_value(value: Option<&FieldValue>) -> Result<Option<Vec<u8>>, StorageError> {
    value
        .map(|v| v.to_msgpack().map_err(|e| StorageError::Serialization(e.to_string())))
        .transpose()
}

fn decode_value(bytes: Option<Vec<u8>>) -> Result<Option<FieldValue>, StorageError> {
    bytes
        .map(|b| FieldValue::from_msgpack(&b).map_err(|e| StorageError::Serialization(e.to_string())))
        .transpose()
}

fn encode_fields(fields: &FieldMap) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec(fields).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode_fields(bytes: &[u8]) -> Result<FieldMap, StorageError> {
    rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

const CONFLICT_COLUMNS: &str = "conflict_id, scope, table_name, record_id, conflict_type, \
     source_data, target_data, baseline, status, detected_at, resolved_data, \
     resolved_strategy, resolved_at, archived_at";

/// Row as read from SQLite, before any decoding that can fail outside rusqlite.
struct RawConflict {
    conflict_id: Vec<u8>,
    scope: String,
    table_name: String,
    record_id: String,
    conflict_type: String,
    source_data: Vec<u8>,
    target_data: Vec<u8>,
    baseline: Option<i64>,
    status: String,
    detected_at: Vec<u8>,
    resolved_data: Option<Vec<u8>>,
    resolved_strategy: Option<String>,
    resolved_at: Option<Vec<u8>>,
    archived_at: Option<Vec<u8>>,
}

fn read_raw(row: &rusqlite::Row) -> rusqlite::Result<RawConflict> {
    Ok(RawConflict {
        conflict_id: row.get(0)?,
        scope: row.get(1)?,
        table_name: row.get(2)?,
        record_id: row.get(3)?,
        conflict_type: row.get(4)?,
        source_data: row.get(5)?,
        target_data: row.get(6)?,
        baseline: row.get(7)?,
        status: row.get(8)?,
        detected_at: row.get(9)?,
        resolved_data: row.get(10)?,
        resolved_strategy: row.get(11)?,
        resolved_at: row.get(12)?,
        archived_at: row.get(13)?,
    })
}

fn decode_hlc(bytes: Option<Vec<u8>>, label: &str) -> Result<Option<Hlc>, StorageError> {
    bytes
        .map(|b| to_array::<12>(b, label).map(|arr| Hlc::from_bytes(&arr)))
        .transpose()
}

fn hydrate(conn: &Connection, raw: RawConflict) -> Result<ConflictData, StorageError> {
    let id = ConflictId::from_bytes(to_array::<16>(raw.conflict_id, "conflict_id")?);
    let suggestions = fetch_suggestions(conn, id)?;
    Ok(ConflictData {
        id,
        scope: Scope::new(raw.scope),
        table_name: raw.table_name,
        record_id: raw.record_id,
        conflict_type: ConflictType::parse(&raw.conflict_type)?,
        source_data: Snapshot::from_msgpack(&raw.source_data)?,
        target_data: Snapshot::from_msgpack(&raw.target_data)?,
        baseline: raw.baseline,
        suggestions,
        status: ConflictStatus::parse(&raw.status)?,
        detected_at: Hlc::from_bytes(&to_array::<12>(raw.detected_at, "detected_at")?),
        resolved_data: raw.resolved_data.as_deref().map(decode_fields).transpose()?,
        resolved_strategy: raw
            .resolved_strategy
            .as_deref()
            .map(ResolvedStrategy::parse)
            .transpose()?,
        resolved_at: decode_hlc(raw.resolved_at, "resolved_at")?,
        archived_at: decode_hlc(raw.archived_at, "archived_at")?,
    })
}

fn fetch_conflict(
    conn: &Connection,
    conflict_id: ConflictId,
) -> Result<Option<ConflictData>, StorageError> {
    let raw = conn
        .query_row(
            &format!("SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE conflict_id = ?1"),
            rusqlite::params![conflict_id.as_bytes().as_slice()],
            read_raw,
        )
        .optional()?;
    raw.map(|raw| hydrate(conn, raw)).transpose()
}

fn fetch_pending_for_record(
    conn: &Connection,
    scope: &Scope,
    key: &RecordKey,
) -> Result<Option<ConflictData>, StorageError> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {CONFLICT_COLUMNS} FROM conflicts \
                 WHERE scope = ?1 AND table_name = ?2 AND record_id = ?3 AND status = 'pending'"
            ),
            rusqlite::params![scope.as_str(), key.table_name, key.record_id],
            read_raw,
        )
        .optional()?;
    raw.map(|raw| hydrate(conn, raw)).transpose()
}

fn fetch_many(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<ConflictData>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let raws = stmt
        .query_map(params, read_raw)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(|raw| hydrate(conn, raw)).collect()
}

fn fetch_suggestions(
    conn: &Connection,
    conflict_id: ConflictId,
) -> Result<Vec<FieldSuggestion>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT field, source_value, target_value, recommended_value, confidence, signal, reason \
         FROM conflict_suggestions WHERE conflict_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(
        rusqlite::params![conflict_id.as_bytes().as_slice()],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<Vec<u8>>>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        },
    )?;

    let mut result = Vec::new();
    for row in rows {
        let (field, source, target, recommended, confidence, signal, reason) = row?;
        result.push(FieldSuggestion {
            field,
            source_value: decode_value(source)?,
            target_value: decode_value(target)?,
            recommended_value: decode_value(recommended)?,
            confidence,
            signal: SuggestionSignal::parse(&signal)?,
            reason,
        });
    }
    Ok(result)
}

fn write_suggestions(
    conn: &Connection,
    conflict_id: ConflictId,
    suggestions: &[FieldSuggestion],
) -> Result<(), StorageError> {
    conn.execute(
        "DELETE FROM conflict_suggestions WHERE conflict_id = ?1",
        rusqlite::params![conflict_id.as_bytes().as_slice()],
    )?;
    for (position, s) in suggestions.iter().enumerate() {
        if !(0.0..=1.0).contains(&s.confidence) {
            return Err(StorageError::ConstraintViolation(format!(
                "confidence {} for field {} outside [0, 1]",
                s.confidence, s.field
            )));
        }
        conn.execute(
            "INSERT INTO conflict_suggestions (conflict_id, position, field, source_value, target_value, recommended_value, confidence, signal, reason) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                conflict_id.as_bytes().as_slice(),
                position as i64,
                s.field,
                encode_value(s.source_value.as_ref())?,
                encode_value(s.target_value.as_ref())?,
                encode_value(s.recommended_value.as_ref())?,
                s.confidence,
                s.signal.as_str(),
                s.reason,
            ],
        )?;
    }
    Ok(())
}

impl ConflictStorage for SqliteStorage {
    fn upsert_pending(
        &mut self,
        conflict: &ConflictData,
        fingerprint: [u8; 32],
        observed_at: Hlc,
    ) -> Result<UpsertOutcome, StorageError> {
        if conflict.suggestions.is_empty() {
            return Err(StorageError::ConstraintViolation(format!(
                "pending conflict for {}/{} has no suggestions",
                conflict.table_name, conflict.record_id
            )));
        }

        let source_bytes = conflict.source_data.to_msgpack()?;
        let target_bytes = conflict.target_data.to_msgpack()?;

        // SAVEPOINT nests inside a caller's BEGIN IMMEDIATE.
        let sp = self.conn.savepoint()?;
        let existing = fetch_pending_for_record(&sp, &conflict.scope, &conflict.record_key())?;

        let (conflict_id, created) = match existing {
            Some(existing) => {
                sp.execute(
                    "UPDATE conflicts SET conflict_type = ?1, source_data = ?2, target_data = ?3, baseline = ?4, fingerprint = ?5, refreshed_at = ?6 WHERE conflict_id = ?7 AND status = 'pending'",
                    rusqlite::params![
                        conflict.conflict_type.as_str(),
                        source_bytes,
                        target_bytes,
                        conflict.baseline,
                        &fingerprint[..],
                        &observed_at.to_bytes()[..],
                        existing.id.as_bytes().as_slice(),
                    ],
                )?;
                (existing.id, false)
            }
            None => {
                sp.execute(
                    "INSERT INTO conflicts (conflict_id, scope, table_name, record_id, conflict_type, source_data, target_data, baseline, fingerprint, status, detected_at, refreshed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?11)",
                    rusqlite::params![
                        conflict.id.as_bytes().as_slice(),
                        conflict.scope.as_str(),
                        conflict.table_name,
                        conflict.record_id,
                        conflict.conflict_type.as_str(),
                        source_bytes,
                        target_bytes,
                        conflict.baseline,
                        &fingerprint[..],
                        &conflict.detected_at.to_bytes()[..],
                        &observed_at.to_bytes()[..],
                    ],
                )?;
                (conflict.id, true)
            }
        };

        write_suggestions(&sp, conflict_id, &conflict.suggestions)?;
        let stored = fetch_conflict(&sp, conflict_id)?
            .ok_or_else(|| StorageError::NotFound(conflict_id.to_string()))?;
        sp.commit()?;

        Ok(UpsertOutcome {
            conflict: stored,
            created,
        })
    }

    fn get_conflict(&self, conflict_id: ConflictId) -> Result<Option<ConflictData>, StorageError> {
        fetch_conflict(&self.conn, conflict_id)
    }

    fn conflict_fingerprint(
        &self,
        conflict_id: ConflictId,
    ) -> Result<Option<[u8; 32]>, StorageError> {
        self.conn
            .query_row(
                "SELECT fingerprint FROM conflicts WHERE conflict_id = ?1",
                rusqlite::params![conflict_id.as_bytes().as_slice()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?
            .map(|bytes| to_array::<32>(bytes, "fingerprint"))
            .transpose()
    }

    fn latest_for_record(
        &self,
        scope: &Scope,
        key: &RecordKey,
    ) -> Result<Option<RecordConflictHead>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT conflict_id, status, fingerprint FROM conflicts \
                 WHERE scope = ?1 AND table_name = ?2 AND record_id = ?3 \
                 ORDER BY detected_at DESC, rowid DESC LIMIT 1",
                rusqlite::params![scope.as_str(), key.table_name, key.record_id],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id_bytes, status, fingerprint)) => Ok(Some(RecordConflictHead {
                conflict_id: ConflictId::from_bytes(to_array::<16>(id_bytes, "conflict_id")?),
                status: ConflictStatus::parse(&status)?,
                fingerprint: to_array::<32>(fingerprint, "fingerprint")?,
            })),
            None => Ok(None),
        }
    }

    fn list_pending(&self, scope: &Scope) -> Result<Vec<ConflictData>, StorageError> {
        fetch_many(
            &self.conn,
            &format!(
                "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE scope = ?1 AND status = 'pending' \
                 ORDER BY detected_at, rowid"
            ),
            &[&scope.as_str()],
        )
    }

    fn mark_resolved(
        &mut self,
        conflict_id: ConflictId,
        expected_fingerprint: [u8; 32],
        resolved_data: &FieldMap,
        strategy: ResolvedStrategy,
        resolved_at: Hlc,
    ) -> Result<ResolveOutcome, StorageError> {
        let data_bytes = encode_fields(resolved_data)?;
        // State check and write in one statement: only one caller can flip the
        // row, and only while it still holds the snapshots the caller read.
        let changed = self.conn.execute(
            "UPDATE conflicts SET status = 'resolved', resolved_data = ?1, resolved_strategy = ?2, resolved_at = ?3 \
             WHERE conflict_id = ?4 AND status = 'pending' AND fingerprint = ?5",
            rusqlite::params![
                data_bytes,
                strategy.as_str(),
                &resolved_at.to_bytes()[..],
                conflict_id.as_bytes().as_slice(),
                &expected_fingerprint[..],
            ],
        )?;
        if changed == 1 {
            return Ok(ResolveOutcome::Resolved);
        }

        let stored: Option<(String, Option<Vec<u8>>)> = self
            .conn
            .query_row(
                "SELECT status, resolved_data FROM conflicts WHERE conflict_id = ?1",
                rusqlite::params![conflict_id.as_bytes().as_slice()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match stored {
            None => Err(StorageError::NotFound(conflict_id.to_string())),
            Some((status, _)) if status == ConflictStatus::Pending.as_str() => {
                Err(StorageError::ConflictChanged {
                    conflict_id: conflict_id.to_string(),
                })
            }
            Some((_, None)) => Err(StorageError::ConstraintViolation(format!(
                "conflict {conflict_id} resolved without data"
            ))),
            Some((_, Some(bytes))) => {
                if decode_fields(&bytes)? == *resolved_data {
                    Ok(ResolveOutcome::AlreadyApplied)
                } else {
                    Err(StorageError::AlreadyResolved {
                        conflict_id: conflict_id.to_string(),
                    })
                }
            }
        }
    }

    fn stats(&self, scope: &Scope) -> Result<ConflictStats, StorageError> {
        let (pending, resolved): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(status = 'pending'), 0), COALESCE(SUM(status = 'resolved'), 0) \
             FROM conflicts WHERE scope = ?1",
            rusqlite::params![scope.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(ConflictStats::new(pending as u64, resolved as u64))
    }

    fn stats_by_table(
        &self,
        scope: &Scope,
    ) -> Result<BTreeMap<String, ConflictStats>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name, SUM(status = 'pending'), SUM(status = 'resolved') \
             FROM conflicts WHERE scope = ?1 GROUP BY table_name",
        )?;
        let rows = stmt.query_map(rusqlite::params![scope.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut result = BTreeMap::new();
        for row in rows {
            let (table, pending, resolved) = row?;
            result.insert(table, ConflictStats::new(pending as u64, resolved as u64));
        }
        Ok(result)
    }

    fn resolution_history(
        &self,
        scope: &Scope,
        include_archived: bool,
    ) -> Result<Vec<ConflictData>, StorageError> {
        let archived_filter = if include_archived {
            ""
        } else {
            " AND archived_at IS NULL"
        };
        fetch_many(
            &self.conn,
            &format!(
                "SELECT {CONFLICT_COLUMNS} FROM conflicts WHERE scope = ?1 AND status = 'resolved'{archived_filter} \
                 ORDER BY resolved_at, rowid"
            ),
            &[&scope.as_str()],
        )
    }

    fn archive_resolved(
        &mut self,
        scope: &Scope,
        before: Hlc,
        archived_at: Hlc,
    ) -> Result<u64, StorageError> {
        let changed = self.conn.execute(
            "UPDATE conflicts SET archived_at = ?1 \
             WHERE scope = ?2 AND status = 'resolved' AND archived_at IS NULL AND resolved_at < ?3",
            rusqlite::params![
                &archived_at.to_bytes()[..],
                scope.as_str(),
                &before.to_bytes()[..],
            ],
        )?;
        Ok(changed as u64)
    }
}
