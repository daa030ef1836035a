//! Storage layer for the field tracker.
//!
//! Persists events with `rusqlite` and keeps the derived boundary and
//! interval-delta views next to them, so [`Database`] can serve as an
//! [`EventIndex`] for consistency checks.
//!
//! # Thread Safety
//!
//! [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Workers that check fields in parallel each open their own `Database` on the
//! same file.
//!
//! # Schema
//!
//! ## Derived Rows
//!
//! `boundaries` and `interval_deltas` are regenerated from the event payload
//! with [`ft_core::derive`] every time an event is written, inside the same
//! transaction. They are never edited on their own.
//!
//! ## Timestamp Format
//!
//! Each timestamp is stored twice:
//! - as TEXT in RFC 3339 with the offset it was recorded in (e.g.
//!   `2024-01-15T10:30:00+02:00`), which is what gets read back
//! - as `(secs, nanos)` integers since the Unix epoch, which is what range
//!   scans compare and order by
//!
//! Text with mixed offsets does not sort chronologically, hence the split.
//!
//! ## Revisions
//!
//! `events.rev` starts at 1 and is bumped by every write. `lastState` repairs
//! are conditional on the revision the checker read.

use std::path::Path;

use ft_core::{
    Boundary, BoundaryKind, Delta, DurationError, Event, EventId, EventIndex, FieldName,
    IndexError, IntervalDelta, Revision, State, StateError, StoredEvent, Timestamp,
    TimestampError, ValidationError, derive,
};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to encode or decode a JSON column.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The event's duration could not be turned into boundaries.
    #[error(transparent)]
    Duration(#[from] DurationError),
    /// A stored state failed to parse.
    #[error(transparent)]
    State(#[from] StateError),
    /// A stored identifier failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp in {table}: {value}")]
    TimestampParse {
        table: &'static str,
        value: String,
        #[source]
        source: TimestampError,
    },
    /// A stored row holds a value outside its column's domain.
    #[error("invalid row in {table}: {message}")]
    InvalidRow {
        table: &'static str,
        message: String,
    },
}

impl From<DbError> for IndexError {
    fn from(err: DbError) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// Per-field totals for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSummary {
    pub field: FieldName,
    pub events: u64,
    pub last_occur_time: Timestamp,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            -- Events table: one row per logged event
            -- data: the event as JSON (camelCase keys, as accepted by `ft add`)
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                rev INTEGER NOT NULL,
                field TEXT NOT NULL,
                occur_secs INTEGER NOT NULL,
                occur_nanos INTEGER NOT NULL,
                occur_time TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_field ON events(field, occur_secs, occur_nanos);

            -- Boundaries: state changes derived from events
            -- rank: tie-break at equal timestamps (close < open < point)
            -- seq: position within the emitting event
            CREATE TABLE IF NOT EXISTS boundaries (
                event_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                field TEXT NOT NULL,
                ts_secs INTEGER NOT NULL,
                ts_nanos INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                occur_time TEXT NOT NULL,
                rank INTEGER NOT NULL,
                kind TEXT NOT NULL,
                last_state TEXT NOT NULL,
                active_state TEXT NOT NULL,
                PRIMARY KEY (event_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_boundaries_order
                ON boundaries(field, ts_secs, ts_nanos, rank, event_id);

            -- Interval deltas: +1 block open, -1 block close, 0 point
            CREATE TABLE IF NOT EXISTS interval_deltas (
                event_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                field TEXT NOT NULL,
                ts_secs INTEGER NOT NULL,
                ts_nanos INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                occur_time TEXT NOT NULL,
                rank INTEGER NOT NULL,
                delta INTEGER NOT NULL,
                PRIMARY KEY (event_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_interval_deltas_order
                ON interval_deltas(field, ts_secs, ts_nanos, rank, event_id);
            ",
        )?;
        Ok(())
    }

    /// Inserts or replaces an event and regenerates its derived rows.
    ///
    /// Returns the event's new revision.
    pub fn upsert_event(&mut self, event: &Event) -> Result<Revision, DbError> {
        let tx = self.conn.transaction()?;
        let revision = current_revision(&tx, &event.id)?.map_or(Revision::INITIAL, Revision::next);
        write_event(&tx, event, revision)?;
        tx.commit()?;
        tracing::debug!(id = %event.id, field = %event.field, %revision, "stored event");
        Ok(revision)
    }

    /// Lists fields with their event counts, ordered by name.
    pub fn list_fields(&self) -> Result<Vec<FieldSummary>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT e.field, COUNT(*),
                (SELECT l.occur_time FROM events l
                 WHERE l.field = e.field
                 ORDER BY l.occur_secs DESC, l.occur_nanos DESC, l.id DESC
                 LIMIT 1)
            FROM events e
            GROUP BY e.field
            ORDER BY e.field ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut fields = Vec::new();
        for row in rows {
            let (field, count, last) = row?;
            fields.push(FieldSummary {
                field: FieldName::new(field)?,
                events: count.unsigned_abs(),
                last_occur_time: parse_timestamp("events", &last)?,
            });
        }
        Ok(fields)
    }

    fn load_event(&self, id: &EventId) -> Result<Option<StoredEvent>, DbError> {
        load_event(&self.conn, id)
    }
}

impl EventIndex for Database {
    fn boundaries(
        &self,
        field: &FieldName,
        start: Timestamp,
        end: Option<Timestamp>,
    ) -> Result<Vec<Boundary>, IndexError> {
        let (start_secs, start_nanos) = sort_parts(start);
        let (end_secs, end_nanos) = end.map(sort_parts).unzip();
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT event_id, field, timestamp, occur_time, kind, last_state, active_state
                FROM boundaries
                WHERE field = ?1
                  AND (ts_secs, ts_nanos) >= (?2, ?3)
                  AND (?4 IS NULL OR (ts_secs, ts_nanos) < (?4, ?5))
                ORDER BY ts_secs ASC, ts_nanos ASC, rank ASC, event_id ASC, seq ASC
                ",
            )
            .map_err(DbError::from)?;
        let rows = stmt
            .query_map(
                params![
                    field.as_str(),
                    start_secs,
                    start_nanos,
                    end_secs,
                    end_nanos
                ],
                BoundaryRow::from_row,
            )
            .map_err(DbError::from)?;
        let mut boundaries = Vec::new();
        for row in rows {
            boundaries.push(row.map_err(DbError::from)?.into_boundary()?);
        }
        Ok(boundaries)
    }

    fn boundary_before(
        &self,
        field: &FieldName,
        before: Timestamp,
    ) -> Result<Option<Boundary>, IndexError> {
        let (secs, nanos) = sort_parts(before);
        let row = self
            .conn
            .query_row(
                "
                SELECT event_id, field, timestamp, occur_time, kind, last_state, active_state
                FROM boundaries
                WHERE field = ?1 AND (ts_secs, ts_nanos) < (?2, ?3)
                ORDER BY ts_secs DESC, ts_nanos DESC, rank DESC, event_id DESC, seq DESC
                LIMIT 1
                ",
                params![field.as_str(), secs, nanos],
                BoundaryRow::from_row,
            )
            .optional()
            .map_err(DbError::from)?;
        Ok(row.map(BoundaryRow::into_boundary).transpose()?)
    }

    fn deltas(
        &self,
        field: &FieldName,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<IntervalDelta>, IndexError> {
        let (start_secs, start_nanos) = sort_parts(start);
        let (end_secs, end_nanos) = sort_parts(end);
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT event_id, field, timestamp, occur_time, delta
                FROM interval_deltas
                WHERE field = ?1
                  AND (ts_secs, ts_nanos) >= (?2, ?3)
                  AND (ts_secs, ts_nanos) <= (?4, ?5)
                ORDER BY ts_secs ASC, ts_nanos ASC, rank ASC, event_id ASC, seq ASC
                ",
            )
            .map_err(DbError::from)?;
        let rows = stmt
            .query_map(
                params![
                    field.as_str(),
                    start_secs,
                    start_nanos,
                    end_secs,
                    end_nanos
                ],
                DeltaRow::from_row,
            )
            .map_err(DbError::from)?;
        let mut deltas = Vec::new();
        for row in rows {
            deltas.push(row.map_err(DbError::from)?.into_delta()?);
        }
        Ok(deltas)
    }

    fn block_change_before(
        &self,
        field: &FieldName,
        before: Timestamp,
    ) -> Result<Option<IntervalDelta>, IndexError> {
        let (secs, nanos) = sort_parts(before);
        let row = self
            .conn
            .query_row(
                "
                SELECT event_id, field, timestamp, occur_time, delta
                FROM interval_deltas
                WHERE field = ?1 AND delta != 0 AND (ts_secs, ts_nanos) < (?2, ?3)
                ORDER BY ts_secs DESC, ts_nanos DESC, rank DESC, event_id DESC, seq DESC
                LIMIT 1
                ",
                params![field.as_str(), secs, nanos],
                DeltaRow::from_row,
            )
            .optional()
            .map_err(DbError::from)?;
        Ok(row.map(DeltaRow::into_delta).transpose()?)
    }

    fn event(&self, id: &EventId) -> Result<Option<StoredEvent>, IndexError> {
        Ok(self.load_event(id)?)
    }

    fn patch_last_state(
        &mut self,
        id: &EventId,
        expected: Revision,
        last_state: State,
    ) -> Result<Revision, IndexError> {
        let tx = self.conn.transaction().map_err(DbError::from)?;
        let Some(stored) = load_event(&tx, id)? else {
            return Err(IndexError::NotFound { id: id.clone() });
        };
        if stored.revision != expected {
            return Err(IndexError::Conflict {
                id: id.clone(),
                expected,
            });
        }
        let event = stored.event.with_last_state(last_state);
        let revision = expected.next();
        write_event(&tx, &event, revision)?;
        tx.commit().map_err(DbError::from)?;
        tracing::debug!(%id, %revision, "patched lastState");
        Ok(revision)
    }
}

fn current_revision(conn: &Connection, id: &EventId) -> Result<Option<Revision>, DbError> {
    let rev = conn
        .query_row(
            "SELECT rev FROM events WHERE id = ?",
            [id.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    rev.map(revision_from_sql).transpose()
}

fn load_event(conn: &Connection, id: &EventId) -> Result<Option<StoredEvent>, DbError> {
    let row = conn
        .query_row(
            "SELECT rev, data FROM events WHERE id = ?",
            [id.as_str()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    let Some((rev, data)) = row else {
        return Ok(None);
    };
    Ok(Some(StoredEvent {
        event: serde_json::from_str(&data)?,
        revision: revision_from_sql(rev)?,
    }))
}

/// Writes the event row at `revision` and replaces its derived rows.
fn write_event(conn: &Connection, event: &Event, revision: Revision) -> Result<(), DbError> {
    let derived = derive(event)?;
    let data = serde_json::to_string(event)?;
    let (occur_secs, occur_nanos) = sort_parts(event.occur_time);

    conn.execute(
        "
        INSERT INTO events (id, rev, field, occur_secs, occur_nanos, occur_time, data)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            rev = excluded.rev,
            field = excluded.field,
            occur_secs = excluded.occur_secs,
            occur_nanos = excluded.occur_nanos,
            occur_time = excluded.occur_time,
            data = excluded.data
        ",
        params![
            event.id.as_str(),
            revision_to_sql(revision)?,
            event.field.as_str(),
            occur_secs,
            occur_nanos,
            event.occur_time.to_string(),
            data,
        ],
    )?;
    conn.execute(
        "DELETE FROM boundaries WHERE event_id = ?",
        [event.id.as_str()],
    )?;
    conn.execute(
        "DELETE FROM interval_deltas WHERE event_id = ?",
        [event.id.as_str()],
    )?;

    let mut stmt = conn.prepare(
        "
        INSERT INTO boundaries
        (event_id, seq, field, ts_secs, ts_nanos, timestamp, occur_time, rank, kind, last_state, active_state)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )?;
    for (seq, row) in (0_i64..).zip(&derived.boundaries) {
        let (secs, nanos) = sort_parts(row.timestamp);
        stmt.execute(params![
            row.event_id.as_str(),
            seq,
            row.field.as_str(),
            secs,
            nanos,
            row.timestamp.to_string(),
            row.occur_time.to_string(),
            row.kind.delta().rank(),
            row.kind.as_str(),
            row.last_state.to_string(),
            row.active_state.to_string(),
        ])?;
    }

    let mut stmt = conn.prepare(
        "
        INSERT INTO interval_deltas
        (event_id, seq, field, ts_secs, ts_nanos, timestamp, occur_time, rank, delta)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )?;
    for (seq, row) in (0_i64..).zip(&derived.deltas) {
        let (secs, nanos) = sort_parts(row.timestamp);
        stmt.execute(params![
            row.event_id.as_str(),
            seq,
            row.field.as_str(),
            secs,
            nanos,
            row.timestamp.to_string(),
            row.occur_time.to_string(),
            row.delta.rank(),
            row.delta.value(),
        ])?;
    }
    Ok(())
}

#[derive(Debug)]
struct BoundaryRow {
    event_id: String,
    field: String,
    timestamp: String,
    occur_time: String,
    kind: String,
    last_state: String,
    active_state: String,
}

impl BoundaryRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            field: row.get(1)?,
            timestamp: row.get(2)?,
            occur_time: row.get(3)?,
            kind: row.get(4)?,
            last_state: row.get(5)?,
            active_state: row.get(6)?,
        })
    }

    fn into_boundary(self) -> Result<Boundary, DbError> {
        const TABLE: &str = "boundaries";
        let kind = self
            .kind
            .parse::<BoundaryKind>()
            .map_err(|message| DbError::InvalidRow {
                table: TABLE,
                message,
            })?;
        Ok(Boundary {
            event_id: EventId::new(self.event_id)?,
            field: FieldName::new(self.field)?,
            timestamp: parse_timestamp(TABLE, &self.timestamp)?,
            occur_time: parse_timestamp(TABLE, &self.occur_time)?,
            kind,
            last_state: parse_state(&self.last_state)?,
            active_state: parse_state(&self.active_state)?,
        })
    }
}

#[derive(Debug)]
struct DeltaRow {
    event_id: String,
    field: String,
    timestamp: String,
    occur_time: String,
    delta: i64,
}

impl DeltaRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            field: row.get(1)?,
            timestamp: row.get(2)?,
            occur_time: row.get(3)?,
            delta: row.get(4)?,
        })
    }

    fn into_delta(self) -> Result<IntervalDelta, DbError> {
        const TABLE: &str = "interval_deltas";
        let delta = Delta::from_value(self.delta).ok_or_else(|| DbError::InvalidRow {
            table: TABLE,
            message: format!("delta out of range: {}", self.delta),
        })?;
        Ok(IntervalDelta {
            event_id: EventId::new(self.event_id)?,
            field: FieldName::new(self.field)?,
            timestamp: parse_timestamp(TABLE, &self.timestamp)?,
            occur_time: parse_timestamp(TABLE, &self.occur_time)?,
            delta,
        })
    }
}

/// `(seconds, nanoseconds)` since the Unix epoch, the columns rows are ordered by.
fn sort_parts(timestamp: Timestamp) -> (i64, u32) {
    let instant = timestamp.instant();
    (instant.timestamp(), instant.timestamp_subsec_nanos())
}

fn parse_timestamp(table: &'static str, value: &str) -> Result<Timestamp, DbError> {
    value.parse().map_err(|source| DbError::TimestampParse {
        table,
        value: value.to_string(),
        source,
    })
}

fn parse_state(value: &str) -> Result<State, DbError> {
    let json: Value = serde_json::from_str(value)?;
    Ok(State::from_json(json)?)
}

fn revision_to_sql(revision: Revision) -> Result<i64, DbError> {
    i64::try_from(revision.value()).map_err(|_| DbError::InvalidRow {
        table: "events",
        message: format!("revision out of range: {revision}"),
    })
}

fn revision_from_sql(rev: i64) -> Result<Revision, DbError> {
    u64::try_from(rev)
        .map(Revision::new)
        .map_err(|_| DbError::InvalidRow {
            table: "events",
            message: format!("revision out of range: {rev}"),
        })
}
