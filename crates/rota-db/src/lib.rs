//! Storage layer for rota.
//!
//! Provides persistence for shifts, hosts, hub meetings, timesheets, users,
//! the local task queue and the event outbox using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Processes that run several entry points at once open one `Database` each; SQLite
//! serializes writers and a busy connection surfaces as a transient store error that
//! the engines retry.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! (e.g., `2026-03-02T14:00:00.000Z`). Every write goes through one formatter, so
//! lexicographic ordering matches chronological ordering and range queries can
//! compare strings directly.
//!
//! ## JSON Columns
//!
//! Nested values (participant lists, meeting references, hub assignments, task
//! payloads) are stored as JSON text. Adding fields is safe as long as they carry
//! `#[serde(default)]`; renames require a migration.

mod contacts;
mod outbox;
mod queue;
mod store;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rota_core::{
    Contact, HostId, HubId, HubMeeting, Shift, ShiftStatus, StoreError, TimesheetEntry,
    ValidationError,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use contacts::normalize_contact;
pub use outbox::OutboxRecord;

/// How long a connection waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to encode a JSON column.
    #[error("json encoding error: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for {id}: {timestamp}")]
    TimestampParse {
        id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored row could not be decoded.
    #[error("invalid record {id}: {message}")]
    InvalidRecord { id: String, message: String },
    /// An imported user record has no usable id.
    #[error("user record has no id")]
    MissingUserId,
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DbError {
    /// Lock contention that is worth retrying.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(err) => matches!(
                err.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if err.is_busy() {
            return Self::Transient(Box::new(err));
        }
        match err {
            DbError::TimestampParse { id, timestamp, .. } => Self::Corrupt {
                id,
                message: format!("invalid timestamp {timestamp}"),
            },
            DbError::InvalidRecord { id, message } => Self::Corrupt { id, message },
            other => Self::Backend(Box::new(other)),
        }
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// Shift counts per status, for the status overview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCount {
    pub status: ShiftStatus,
    pub count: i64,
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
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS hosts (
                id TEXT PRIMARY KEY,
                max_concurrent INTEGER NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                display_name TEXT,
                last_used_at TEXT
            );

            -- participant_ids, participant_names: JSON arrays
            -- meeting: JSON MeetingRef, hub: JSON HubAssignment (hub_id mirrors hub.hub_id)
            -- host_id may name a configured fallback host, so it is not a foreign key
            CREATE TABLE IF NOT EXISTS shifts (
                id TEXT PRIMARY KEY,
                organizer_id TEXT NOT NULL,
                organizer_name TEXT,
                participant_ids TEXT NOT NULL DEFAULT '[]',
                participant_names TEXT NOT NULL DEFAULT '[]',
                start_at TEXT NOT NULL,
                end_at TEXT NOT NULL,
                status TEXT NOT NULL,
                pay_rate REAL NOT NULL DEFAULT 0,
                host_id TEXT,
                meeting TEXT,
                hub_id TEXT,
                hub TEXT,
                start_task TEXT,
                end_task TEXT,
                clock_in_at TEXT,
                clock_out_at TEXT,
                worked_minutes INTEGER,
                auto_clock_out INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_shifts_start ON shifts(start_at);
            CREATE INDEX IF NOT EXISTS idx_shifts_end ON shifts(end_at);
            CREATE INDEX IF NOT EXISTS idx_shifts_host ON shifts(host_id);
            CREATE INDEX IF NOT EXISTS idx_shifts_status ON shifts(status);

            CREATE TABLE IF NOT EXISTS hub_meetings (
                id TEXT PRIMARY KEY,
                bucket_start TEXT NOT NULL,
                bucket_end TEXT NOT NULL,
                meeting_start TEXT NOT NULL,
                meeting_end TEXT NOT NULL,
                status TEXT NOT NULL,
                host_id TEXT NOT NULL,
                meeting TEXT,
                shift_ids TEXT NOT NULL DEFAULT '[]',
                participant_count INTEGER NOT NULL,
                capacity INTEGER NOT NULL,
                CHECK (participant_count <= capacity)
            );

            CREATE INDEX IF NOT EXISTS idx_hub_meetings_start ON hub_meetings(meeting_start);
            CREATE INDEX IF NOT EXISTS idx_hub_meetings_host ON hub_meetings(host_id);

            CREATE TABLE IF NOT EXISTS timesheet_entries (
                id TEXT PRIMARY KEY,
                shift_id TEXT NOT NULL,
                clock_in TEXT NOT NULL,
                clock_out TEXT,
                hourly_rate REAL,
                worked_minutes INTEGER NOT NULL DEFAULT 0,
                pay REAL NOT NULL DEFAULT 0,
                completion_method TEXT NOT NULL,
                FOREIGN KEY (shift_id) REFERENCES shifts(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_timesheet_entries_shift ON timesheet_entries(shift_id);

            -- Canonical contact; raw keeps the imported record as given.
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT,
                email_verified INTEGER NOT NULL DEFAULT 1,
                display_name TEXT,
                raw TEXT
            );

            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                name TEXT PRIMARY KEY,
                phase TEXT NOT NULL,
                fire_at TEXT NOT NULL,
                callback_url TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_fire ON scheduled_tasks(fire_at);

            CREATE TABLE IF NOT EXISTS outbox (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                delivered_at TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox(delivered_at, seq);
            ",
        )?;
        Ok(())
    }

    /// Inserts or replaces a host. `last_used_at` is preserved when already set.
    pub fn upsert_host(&self, host: &rota_core::Host) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO hosts (id, max_concurrent, priority, active, display_name, last_used_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                max_concurrent = excluded.max_concurrent,
                priority = excluded.priority,
                active = excluded.active,
                display_name = COALESCE(excluded.display_name, hosts.display_name),
                last_used_at = COALESCE(hosts.last_used_at, excluded.last_used_at)
            ",
            params![
                host.id.as_str(),
                host.max_concurrent,
                host.priority,
                host.active,
                host.display_name,
                host.last_used_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    }

    /// Lists every host, active or not, in priority order.
    pub fn list_hosts(&self) -> Result<Vec<rota_core::Host>, DbError> {
        self.query_hosts(
            "SELECT id, max_concurrent, priority, active, display_name, last_used_at
             FROM hosts ORDER BY priority ASC, id ASC",
        )
    }

    /// Sets the active flag. Returns `false` when the host does not exist.
    pub fn set_host_active(&self, id: &HostId, active: bool) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE hosts SET active = ? WHERE id = ?",
            params![active, id.as_str()],
        )?;
        Ok(changed > 0)
    }

    fn query_hosts(&self, sql: &str) -> Result<Vec<rota_core::Host>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(HostRow {
                id: row.get(0)?,
                max_concurrent: row.get(1)?,
                priority: row.get(2)?,
                active: row.get(3)?,
                display_name: row.get(4)?,
                last_used_at: row.get(5)?,
            })
        })?;
        let mut hosts = Vec::new();
        for row in rows {
            hosts.push(row?.into_host()?);
        }
        Ok(hosts)
    }

    /// Inserts or replaces a canonical contact.
    pub fn upsert_contact(&self, contact: &Contact) -> Result<(), DbError> {
        self.upsert_user(contact, None)
    }

    /// Normalizes and stores an imported user record.
    pub fn import_user(&self, raw: &serde_json::Value) -> Result<Contact, DbError> {
        let contact = normalize_contact(raw)?;
        self.upsert_user(&contact, Some(&serde_json::to_string(raw)?))?;
        Ok(contact)
    }

    fn upsert_user(&self, contact: &Contact, raw: Option<&str>) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO users (id, email, email_verified, display_name, raw)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                email_verified = excluded.email_verified,
                display_name = excluded.display_name,
                raw = COALESCE(excluded.raw, users.raw)
            ",
            params![
                contact.user_id.as_str(),
                contact.email,
                contact.email_verified,
                contact.display_name,
                raw,
            ],
        )?;
        Ok(())
    }

    /// Lists shifts ordered by start, optionally filtered by status.
    pub fn list_shifts(&self, status: Option<ShiftStatus>) -> Result<Vec<Shift>, DbError> {
        match status {
            Some(status) => self.query_shifts(
                "WHERE status = ? ORDER BY start_at ASC, id ASC",
                params![status.as_str()],
            ),
            None => self.query_shifts("ORDER BY start_at ASC, id ASC", params![]),
        }
    }

    /// Looks up a hub meeting by id.
    pub fn get_hub(&self, id: &HubId) -> Result<Option<HubMeeting>, DbError> {
        let mut hubs = self.query_hubs("WHERE id = ?", params![id.as_str()])?;
        Ok(hubs.pop())
    }

    /// Lists hub meetings whose meeting window ends after `since`.
    pub fn list_hubs(&self, since: DateTime<Utc>) -> Result<Vec<HubMeeting>, DbError> {
        self.query_hubs(
            "WHERE meeting_end > ? ORDER BY meeting_start ASC, id ASC",
            params![format_timestamp(since)],
        )
    }

    /// Counts shifts by status, most common first.
    pub fn shift_status_counts(&self) -> Result<Vec<StatusCount>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT status, COUNT(*) AS total
            FROM shifts
            GROUP BY status
            ORDER BY total DESC, status ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row?;
            counts.push(StatusCount {
                status: parse_enum(&status, &status)?,
                count,
            });
        }
        Ok(counts)
    }

    fn query_shifts(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Shift>, DbError> {
        let sql = format!("SELECT {SHIFT_COLUMNS} FROM shifts {clause}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, ShiftRow::from_row)?;
        let mut shifts = Vec::new();
        for row in rows {
            shifts.push(row?.into_shift()?);
        }
        Ok(shifts)
    }

    fn query_hubs(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<HubMeeting>, DbError> {
        let sql = format!("SELECT {HUB_COLUMNS} FROM hub_meetings {clause}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, HubRow::from_row)?;
        let mut hubs = Vec::new();
        for row in rows {
            hubs.push(row?.into_hub()?);
        }
        Ok(hubs)
    }

    fn query_entries(&self, shift_id: &str) -> Result<Vec<TimesheetEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, shift_id, clock_in, clock_out, hourly_rate, worked_minutes, pay, completion_method
            FROM timesheet_entries
            WHERE shift_id = ?
            ORDER BY clock_in ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([shift_id], |row| {
            Ok(EntryRow {
                id: row.get(0)?,
                shift_id: row.get(1)?,
                clock_in: row.get(2)?,
                clock_out: row.get(3)?,
                hourly_rate: row.get(4)?,
                worked_minutes: row.get(5)?,
                pay: row.get(6)?,
                completion_method: row.get(7)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    fn query_contact(&self, id: &str) -> Result<Option<Contact>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, email, email_verified, display_name FROM users WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(id, email, email_verified, display_name)| {
            Ok(Contact {
                user_id: rota_core::UserId::new(id)?,
                email,
                email_verified,
                display_name,
            })
        })
        .transpose()
    }
}

const SHIFT_COLUMNS: &str = "id, organizer_id, organizer_name, participant_ids, participant_names, \
     start_at, end_at, status, pay_rate, host_id, meeting, hub, start_task, end_task, \
     clock_in_at, clock_out_at, worked_minutes, auto_clock_out";

const HUB_COLUMNS: &str = "id, bucket_start, bucket_end, meeting_start, meeting_end, status, \
     host_id, meeting, shift_ids, participant_count, capacity";

#[derive(Debug)]
struct ShiftRow {
    id: String,
    organizer_id: String,
    organizer_name: Option<String>,
    participant_ids: String,
    participant_names: String,
    start_at: String,
    end_at: String,
    status: String,
    pay_rate: f64,
    host_id: Option<String>,
    meeting: Option<String>,
    hub: Option<String>,
    start_task: Option<String>,
    end_task: Option<String>,
    clock_in_at: Option<String>,
    clock_out_at: Option<String>,
    worked_minutes: Option<i64>,
    auto_clock_out: bool,
}

impl ShiftRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            organizer_id: row.get(1)?,
            organizer_name: row.get(2)?,
            participant_ids: row.get(3)?,
            participant_names: row.get(4)?,
            start_at: row.get(5)?,
            end_at: row.get(6)?,
            status: row.get(7)?,
            pay_rate: row.get(8)?,
            host_id: row.get(9)?,
            meeting: row.get(10)?,
            hub: row.get(11)?,
            start_task: row.get(12)?,
            end_task: row.get(13)?,
            clock_in_at: row.get(14)?,
            clock_out_at: row.get(15)?,
            worked_minutes: row.get(16)?,
            auto_clock_out: row.get(17)?,
        })
    }

    fn into_shift(self) -> Result<Shift, DbError> {
        let id = &self.id;
        Ok(Shift {
            organizer_id: rota_core::UserId::new(self.organizer_id)?,
            organizer_name: self.organizer_name,
            participant_ids: parse_json(&self.participant_ids, id)?,
            participant_names: parse_json(&self.participant_names, id)?,
            start: parse_timestamp(&self.start_at, id)?,
            end: parse_timestamp(&self.end_at, id)?,
            status: parse_enum(&self.status, id)?,
            pay_rate: self.pay_rate,
            host_id: self.host_id.map(HostId::new).transpose()?,
            meeting: self.meeting.as_deref().map(|m| parse_json(m, id)).transpose()?,
            hub: self.hub.as_deref().map(|h| parse_json(h, id)).transpose()?,
            start_task: self.start_task,
            end_task: self.end_task,
            clock_in_at: parse_optional_timestamp(self.clock_in_at.as_deref(), id)?,
            clock_out_at: parse_optional_timestamp(self.clock_out_at.as_deref(), id)?,
            worked_minutes: self.worked_minutes,
            auto_clock_out: self.auto_clock_out,
            id: rota_core::ShiftId::new(self.id)?,
        })
    }
}

#[derive(Debug)]
struct HubRow {
    id: String,
    bucket_start: String,
    bucket_end: String,
    meeting_start: String,
    meeting_end: String,
    status: String,
    host_id: String,
    meeting: Option<String>,
    shift_ids: String,
    participant_count: i64,
    capacity: i64,
}

impl HubRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            bucket_start: row.get(1)?,
            bucket_end: row.get(2)?,
            meeting_start: row.get(3)?,
            meeting_end: row.get(4)?,
            status: row.get(5)?,
            host_id: row.get(6)?,
            meeting: row.get(7)?,
            shift_ids: row.get(8)?,
            participant_count: row.get(9)?,
            capacity: row.get(10)?,
        })
    }

    fn into_hub(self) -> Result<HubMeeting, DbError> {
        let id = &self.id;
        Ok(HubMeeting {
            bucket_start: parse_timestamp(&self.bucket_start, id)?,
            bucket_end: parse_timestamp(&self.bucket_end, id)?,
            meeting_start: parse_timestamp(&self.meeting_start, id)?,
            meeting_end: parse_timestamp(&self.meeting_end, id)?,
            status: parse_enum(&self.status, id)?,
            host_id: HostId::new(self.host_id)?,
            meeting: self.meeting.as_deref().map(|m| parse_json(m, id)).transpose()?,
            shift_ids: parse_json(&self.shift_ids, id)?,
            participant_count: to_usize(self.participant_count, id)?,
            capacity: to_usize(self.capacity, id)?,
            id: HubId::new(self.id)?,
        })
    }
}

#[derive(Debug)]
struct HostRow {
    id: String,
    max_concurrent: u32,
    priority: i32,
    active: bool,
    display_name: Option<String>,
    last_used_at: Option<String>,
}

impl HostRow {
    fn into_host(self) -> Result<rota_core::Host, DbError> {
        Ok(rota_core::Host {
            last_used_at: parse_optional_timestamp(self.last_used_at.as_deref(), &self.id)?,
            id: HostId::new(self.id)?,
            max_concurrent: self.max_concurrent,
            priority: self.priority,
            active: self.active,
            display_name: self.display_name,
        })
    }
}

#[derive(Debug)]
struct EntryRow {
    id: String,
    shift_id: String,
    clock_in: String,
    clock_out: Option<String>,
    hourly_rate: Option<f64>,
    worked_minutes: i64,
    pay: f64,
    completion_method: String,
}

impl EntryRow {
    fn into_entry(self) -> Result<TimesheetEntry, DbError> {
        let id = &self.id;
        Ok(TimesheetEntry {
            shift_id: rota_core::ShiftId::new(self.shift_id)?,
            clock_in: parse_timestamp(&self.clock_in, id)?,
            clock_out: parse_optional_timestamp(self.clock_out.as_deref(), id)?,
            hourly_rate: self.hourly_rate,
            worked_minutes: self.worked_minutes,
            pay: self.pay,
            completion_method: parse_enum(&self.completion_method, id)?,
            id: self.id,
        })
    }
}

fn parse_timestamp(timestamp: &str, id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            id: id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn parse_optional_timestamp(
    timestamp: Option<&str>,
    id: &str,
) -> Result<Option<DateTime<Utc>>, DbError> {
    timestamp.map(|t| parse_timestamp(t, id)).transpose()
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_json<T: DeserializeOwned>(raw: &str, id: &str) -> Result<T, DbError> {
    serde_json::from_str(raw).map_err(|err| DbError::InvalidRecord {
        id: id.to_string(),
        message: err.to_string(),
    })
}

fn parse_enum<T: FromStr<Err = ValidationError>>(raw: &str, id: &str) -> Result<T, DbError> {
    raw.parse().map_err(|err: ValidationError| DbError::InvalidRecord {
        id: id.to_string(),
        message: err.to_string(),
    })
}

fn to_usize(value: i64, id: &str) -> Result<usize, DbError> {
    usize::try_from(value).map_err(|_| DbError::InvalidRecord {
        id: id.to_string(),
        message: format!("negative count {value}"),
    })
}
