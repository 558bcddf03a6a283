//! Local deferred-task queue backed by the `scheduled_tasks` table.
//!
//! Stands in for a hosted queue: `rota tasks run-due` drains tasks whose fire
//! time has passed. Task names are the primary key, so scheduling the same
//! name twice is reported as [`ScheduleOutcome::AlreadyExists`].

use chrono::{DateTime, Utc};
use rota_core::ports::{DeleteOutcome, QueueError, ScheduleOutcome, TaskRequest};
use rota_core::{TaskPayload, TaskPhase, TaskQueue};
use rusqlite::params;

use crate::{Database, DbError, format_timestamp, parse_enum, parse_json, parse_timestamp};

impl From<DbError> for QueueError {
    fn from(err: DbError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl Database {
    /// Tasks whose fire time is at or before `now`, earliest first.
    pub fn due_tasks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<TaskRequest>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT name, phase, fire_at, callback_url, payload
            FROM scheduled_tasks
            WHERE fire_at <= ?
            ORDER BY fire_at ASC, name ASC
            LIMIT ?
            ",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![format_timestamp(now), limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut tasks = Vec::new();
        for row in rows {
            let (name, phase, fire_at, callback_url, payload) = row?;
            tasks.push(TaskRequest {
                phase: parse_enum::<TaskPhase>(&phase, &name)?,
                fire_at: parse_timestamp(&fire_at, &name)?,
                callback_url,
                payload: parse_json::<TaskPayload>(&payload, &name)?,
                name,
            });
        }
        Ok(tasks)
    }

    pub fn pending_task_count(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM scheduled_tasks", [], |row| row.get(0))?)
    }

    fn delete_task(&self, name: &str) -> Result<bool, DbError> {
        let changed = self
            .conn
            .execute("DELETE FROM scheduled_tasks WHERE name = ?", [name])?;
        Ok(changed > 0)
    }
}

impl TaskQueue for Database {
    fn schedule(&self, task: &TaskRequest) -> Result<ScheduleOutcome, QueueError> {
        let payload = serde_json::to_string(&task.payload).map_err(DbError::from)?;
        let inserted = self
            .conn
            .execute(
                "
                INSERT OR IGNORE INTO scheduled_tasks (name, phase, fire_at, callback_url, payload, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ",
                params![
                    task.name,
                    task.phase.as_str(),
                    format_timestamp(task.fire_at),
                    task.callback_url,
                    payload,
                    format_timestamp(Utc::now()),
                ],
            )
            .map_err(DbError::from)?;
        Ok(if inserted == 0 {
            ScheduleOutcome::AlreadyExists
        } else {
            ScheduleOutcome::Created
        })
    }

    fn delete(&self, name: &str) -> Result<DeleteOutcome, QueueError> {
        Ok(if self.delete_task(name)? {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }
}
