//! Undelivered domain events.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::{Database, DbError, format_timestamp};

/// One outbox row. `payload` is the serialized `DomainEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub seq: i64,
    /// Stable id for receivers to de-duplicate redeliveries.
    pub event_id: String,
    pub kind: String,
    pub payload: String,
    pub created_at: String,
    pub attempts: i64,
}

impl Database {
    /// Undelivered events in append order.
    pub fn pending_events(&self, limit: usize) -> Result<Vec<OutboxRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT seq, event_id, kind, payload, created_at, attempts
            FROM outbox
            WHERE delivered_at IS NULL
            ORDER BY seq ASC
            LIMIT ?
            ",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], |row| {
            Ok(OutboxRecord {
                seq: row.get(0)?,
                event_id: row.get(1)?,
                kind: row.get(2)?,
                payload: row.get(3)?,
                created_at: row.get(4)?,
                attempts: row.get(5)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn mark_delivered(&self, seq: i64, at: DateTime<Utc>) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE outbox SET delivered_at = ?, attempts = attempts + 1, last_error = NULL WHERE seq = ?",
            params![format_timestamp(at), seq],
        )?;
        Ok(())
    }

    /// Bumps the attempt counter; the row stays pending.
    pub fn record_delivery_failure(&self, seq: i64, error: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE outbox SET attempts = attempts + 1, last_error = ? WHERE seq = ?",
            params![error, seq],
        )?;
        Ok(())
    }

    pub fn pending_event_count(&self) -> Result<i64, DbError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM outbox WHERE delivered_at IS NULL",
            [],
            |row| row.get(0),
        )?)
    }
}
