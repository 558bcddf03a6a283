//! [`ShiftStore`] over SQLite.

use chrono::{DateTime, Utc};
use rota_core::interval::TimeInterval;
use rota_core::ports::StoreError;
use rota_core::{
    Contact, DomainEvent, Host, HostId, HubAssignment, HubId, HubMeeting, MeetingRef,
    Reconciliation, Shift, ShiftId, ShiftStatus, ShiftStore, TimesheetEntry, UserId,
};
use rusqlite::{Transaction, params, params_from_iter};
use uuid::Uuid;

use crate::{Database, DbError, format_timestamp, parse_json, parse_timestamp};

const COMMITTED_SHIFTS: &str = "status IN ('scheduled', 'active')";
const OPEN_HUBS: &str = "status IN ('scheduled', 'started')";

impl Database {
    fn write_assignments(
        tx: &Transaction<'_>,
        assignments: &[(ShiftId, HubAssignment)],
    ) -> Result<(), DbError> {
        let mut stmt = tx.prepare("UPDATE shifts SET hub_id = ?, hub = ? WHERE id = ?")?;
        for (shift_id, assignment) in assignments {
            stmt.execute(params![
                assignment.hub_id.as_str(),
                serde_json::to_string(assignment)?,
                shift_id.as_str(),
            ])?;
        }
        Ok(())
    }

    fn insert_shift_row(&self, shift: &Shift) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO shifts
            (id, organizer_id, organizer_name, participant_ids, participant_names, start_at, end_at,
             status, pay_rate, host_id, meeting, hub_id, hub, start_task, end_task,
             clock_in_at, clock_out_at, worked_minutes, auto_clock_out)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                shift.id.as_str(),
                shift.organizer_id.as_str(),
                shift.organizer_name,
                serde_json::to_string(&shift.participant_ids)?,
                serde_json::to_string(&shift.participant_names)?,
                format_timestamp(shift.start),
                format_timestamp(shift.end),
                shift.status.as_str(),
                shift.pay_rate,
                shift.host_id.as_ref().map(HostId::as_str),
                shift.meeting.as_ref().map(serde_json::to_string).transpose()?,
                shift.hub.as_ref().map(|h| h.hub_id.as_str()),
                shift.hub.as_ref().map(serde_json::to_string).transpose()?,
                shift.start_task,
                shift.end_task,
                shift.clock_in_at.map(format_timestamp),
                shift.clock_out_at.map(format_timestamp),
                shift.worked_minutes,
                shift.auto_clock_out,
            ],
        )?;
        Ok(())
    }

    fn insert_hub_row(&self, hub: &HubMeeting) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO hub_meetings
            (id, bucket_start, bucket_end, meeting_start, meeting_end, status, host_id,
             meeting, shift_ids, participant_count, capacity)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                hub.id.as_str(),
                format_timestamp(hub.bucket_start),
                format_timestamp(hub.bucket_end),
                format_timestamp(hub.meeting_start),
                format_timestamp(hub.meeting_end),
                hub.status.as_str(),
                hub.host_id.as_str(),
                hub.meeting.as_ref().map(serde_json::to_string).transpose()?,
                serde_json::to_string(&hub.shift_ids)?,
                i64::try_from(hub.participant_count).unwrap_or(i64::MAX),
                i64::try_from(hub.capacity).unwrap_or(i64::MAX),
            ],
        )?;
        Ok(())
    }

    fn attach_hub_meeting_rows(
        &self,
        id: &HubId,
        meeting: &MeetingRef,
        assignments: &[(ShiftId, HubAssignment)],
    ) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE hub_meetings SET meeting = ? WHERE id = ?",
            params![serde_json::to_string(meeting)?, id.as_str()],
        )?;
        if changed == 0 {
            return Err(DbError::InvalidRecord {
                id: id.to_string(),
                message: "hub not found".to_string(),
            });
        }
        Self::write_assignments(&tx, assignments)?;
        tx.commit()?;
        Ok(())
    }

    fn join_hub_rows(
        &self,
        id: &HubId,
        seats: usize,
        assignments: &[(ShiftId, HubAssignment)],
    ) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        let raw: String = tx.query_row(
            "SELECT shift_ids FROM hub_meetings WHERE id = ?",
            [id.as_str()],
            |row| row.get(0),
        )?;
        let mut shift_ids: Vec<ShiftId> = parse_json(&raw, id.as_str())?;
        shift_ids.extend(assignments.iter().map(|(shift_id, _)| shift_id.clone()));

        let seats = i64::try_from(seats).unwrap_or(i64::MAX);
        let changed = tx.execute(
            &format!(
                "
                UPDATE hub_meetings
                SET participant_count = participant_count + ?1, shift_ids = ?2
                WHERE id = ?3 AND {OPEN_HUBS} AND participant_count + ?1 <= capacity
                "
            ),
            params![seats, serde_json::to_string(&shift_ids)?, id.as_str()],
        )?;
        if changed == 0 {
            tracing::debug!(hub_id = %id, seats, "hub join rejected, hub is full or closed");
            return Err(DbError::InvalidRecord {
                id: id.to_string(),
                message: format!("hub cannot take {seats} more seats"),
            });
        }
        Self::write_assignments(&tx, assignments)?;
        tx.commit()?;
        Ok(())
    }

    fn apply_reconciliation_rows(
        &self,
        shift: &ShiftId,
        reconciliation: &Reconciliation,
        status: Option<ShiftStatus>,
    ) -> Result<(), DbError> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                UPDATE timesheet_entries
                SET clock_out = ?, worked_minutes = ?, pay = ?, completion_method = ?
                WHERE id = ?
                ",
            )?;
            for entry in &reconciliation.entries {
                stmt.execute(params![
                    entry.clock_out.map(format_timestamp),
                    entry.worked_minutes,
                    entry.pay,
                    entry.completion_method.as_str(),
                    entry.id,
                ])?;
            }
        }
        tx.execute(
            "UPDATE shifts SET worked_minutes = ?, auto_clock_out = ? WHERE id = ?",
            params![
                reconciliation.worked_minutes,
                reconciliation.auto_clock_out,
                shift.as_str(),
            ],
        )?;
        if let Some(status) = status {
            tx.execute(
                "UPDATE shifts SET status = ? WHERE id = ? AND status != 'cancelled'",
                params![status.as_str(), shift.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn append_event_rows(&self, events: &[DomainEvent]) -> Result<(), DbError> {
        let created_at = format_timestamp(Utc::now());
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO outbox (event_id, kind, payload, created_at) VALUES (?, ?, ?, ?)",
            )?;
            for event in events {
                stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    event.kind(),
                    serde_json::to_string(event)?,
                    created_at,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(count = events.len(), "appended outbox events");
        Ok(())
    }

    fn update_shift(
        &self,
        id: &ShiftId,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<(), DbError> {
        let changed = self.conn.execute(sql, params)?;
        if changed == 0 {
            return Err(DbError::InvalidRecord {
                id: id.to_string(),
                message: "shift not found".to_string(),
            });
        }
        Ok(())
    }
}

impl ShiftStore for Database {
    fn get_shift(&self, id: &ShiftId) -> Result<Option<Shift>, StoreError> {
        let mut shifts = self.query_shifts("WHERE id = ?", params![id.as_str()])?;
        Ok(shifts.pop())
    }

    fn insert_shift(&self, shift: &Shift) -> Result<(), StoreError> {
        Ok(self.insert_shift_row(shift)?)
    }

    fn update_shift_times(
        &self,
        id: &ShiftId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        clear_meeting: bool,
    ) -> Result<(), StoreError> {
        Ok(self.update_shift(
            id,
            "
            UPDATE shifts
            SET start_at = ?, end_at = ?, meeting = CASE WHEN ? THEN NULL ELSE meeting END
            WHERE id = ?
            ",
            params![
                format_timestamp(start),
                format_timestamp(end),
                clear_meeting,
                id.as_str()
            ],
        )?)
    }

    fn transition_status(
        &self,
        id: &ShiftId,
        from: &[ShiftStatus],
        to: ShiftStatus,
    ) -> Result<bool, StoreError> {
        if from.is_empty() {
            return Ok(false);
        }
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql =
            format!("UPDATE shifts SET status = ? WHERE id = ? AND status IN ({placeholders})");
        let mut values: Vec<&str> = vec![to.as_str(), id.as_str()];
        for status in from {
            values.push(status.as_str());
        }
        let changed = self
            .conn
            .execute(&sql, params_from_iter(values))
            .map_err(DbError::from)?;
        Ok(changed > 0)
    }

    fn set_host(&self, id: &ShiftId, host: Option<&HostId>) -> Result<(), StoreError> {
        Ok(self.update_shift(
            id,
            "UPDATE shifts SET host_id = ? WHERE id = ?",
            params![host.map(HostId::as_str), id.as_str()],
        )?)
    }

    fn set_meeting(&self, id: &ShiftId, meeting: &MeetingRef) -> Result<(), StoreError> {
        let meeting = serde_json::to_string(meeting).map_err(DbError::from)?;
        Ok(self.update_shift(
            id,
            "UPDATE shifts SET meeting = ? WHERE id = ?",
            params![meeting, id.as_str()],
        )?)
    }

    fn set_task_names(
        &self,
        id: &ShiftId,
        start_task: Option<&str>,
        end_task: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(self.update_shift(
            id,
            "
            UPDATE shifts
            SET start_task = COALESCE(?, start_task), end_task = COALESCE(?, end_task)
            WHERE id = ?
            ",
            params![start_task, end_task, id.as_str()],
        )?)
    }

    fn clear_hub_assignment(&self, id: &ShiftId) -> Result<(), StoreError> {
        Ok(self.update_shift(
            id,
            "UPDATE shifts SET hub_id = NULL, hub = NULL WHERE id = ?",
            params![id.as_str()],
        )?)
    }

    fn hub_candidates(&self, window: &TimeInterval) -> Result<Vec<Shift>, StoreError> {
        Ok(self.query_shifts(
            &format!(
                "WHERE {COMMITTED_SHIFTS} AND hub_id IS NULL AND host_id IS NULL
                 AND start_at >= ? AND start_at <= ?
                 ORDER BY start_at ASC, id ASC"
            ),
            params![format_timestamp(window.start), format_timestamp(window.end)],
        )?)
    }

    fn shifts_with_boundary_in(&self, window: &TimeInterval) -> Result<Vec<Shift>, StoreError> {
        Ok(self.query_shifts(
            &format!(
                "WHERE {COMMITTED_SHIFTS}
                 AND ((start_at >= ?1 AND start_at <= ?2) OR (end_at >= ?1 AND end_at <= ?2))
                 ORDER BY start_at ASC, id ASC"
            ),
            params![format_timestamp(window.start), format_timestamp(window.end)],
        )?)
    }

    fn overdue_shifts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Shift>, StoreError> {
        Ok(self.query_shifts(
            &format!("WHERE {COMMITTED_SHIFTS} AND end_at <= ? ORDER BY end_at ASC, id ASC"),
            params![format_timestamp(cutoff)],
        )?)
    }

    fn committed_intervals(
        &self,
        host: &HostId,
        window: &TimeInterval,
        exclude: Option<&ShiftId>,
    ) -> Result<Vec<TimeInterval>, StoreError> {
        let sql = format!(
            "
            SELECT id, start_at, end_at FROM shifts
            WHERE host_id = ?1 AND {COMMITTED_SHIFTS}
              AND start_at < ?3 AND end_at > ?2
              AND (?4 IS NULL OR id != ?4)
            UNION ALL
            SELECT id, meeting_start, meeting_end FROM hub_meetings
            WHERE host_id = ?1 AND {OPEN_HUBS}
              AND meeting_start < ?3 AND meeting_end > ?2
            "
        );
        let mut stmt = self.conn.prepare(&sql).map_err(DbError::from)?;
        let rows = stmt
            .query_map(
                params![
                    host.as_str(),
                    format_timestamp(window.start),
                    format_timestamp(window.end),
                    exclude.map(ShiftId::as_str),
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .map_err(DbError::from)?;
        let mut intervals = Vec::new();
        for row in rows {
            let (id, start, end) = row.map_err(DbError::from)?;
            intervals.push(TimeInterval::unchecked(
                parse_timestamp(&start, &id)?,
                parse_timestamp(&end, &id)?,
            ));
        }
        Ok(intervals)
    }

    fn active_hosts(&self) -> Result<Vec<Host>, StoreError> {
        Ok(self.query_hosts(
            "
            SELECT id, max_concurrent, priority, active, display_name, last_used_at
            FROM hosts
            WHERE active = 1
            ORDER BY priority ASC, id ASC
            ",
        )?)
    }

    fn touch_host(&self, id: &HostId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE hosts SET last_used_at = ? WHERE id = ?",
                params![format_timestamp(at), id.as_str()],
            )
            .map_err(DbError::from)?;
        Ok(())
    }

    fn contact(&self, id: &UserId) -> Result<Option<Contact>, StoreError> {
        Ok(self.query_contact(id.as_str())?)
    }

    fn open_hubs(&self, meeting_start: DateTime<Utc>) -> Result<Vec<HubMeeting>, StoreError> {
        Ok(self.query_hubs(
            &format!("WHERE meeting_start = ? AND {OPEN_HUBS} ORDER BY id ASC"),
            params![format_timestamp(meeting_start)],
        )?)
    }

    fn insert_hub(&self, hub: &HubMeeting) -> Result<(), StoreError> {
        Ok(self.insert_hub_row(hub)?)
    }

    fn delete_hub(&self, id: &HubId) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM hub_meetings WHERE id = ?", [id.as_str()])
            .map_err(DbError::from)?;
        Ok(())
    }

    fn attach_hub_meeting(
        &self,
        id: &HubId,
        meeting: &MeetingRef,
        assignments: &[(ShiftId, HubAssignment)],
    ) -> Result<(), StoreError> {
        Ok(self.attach_hub_meeting_rows(id, meeting, assignments)?)
    }

    fn join_hub(
        &self,
        id: &HubId,
        seats: usize,
        assignments: &[(ShiftId, HubAssignment)],
    ) -> Result<(), StoreError> {
        Ok(self.join_hub_rows(id, seats, assignments)?)
    }

    fn timesheet_entries(&self, shift: &ShiftId) -> Result<Vec<TimesheetEntry>, StoreError> {
        Ok(self.query_entries(shift.as_str())?)
    }

    fn insert_timesheet_entry(&self, entry: &TimesheetEntry) -> Result<(), StoreError> {
        self.conn
            .execute(
                "
                INSERT INTO timesheet_entries
                (id, shift_id, clock_in, clock_out, hourly_rate, worked_minutes, pay, completion_method)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ",
                params![
                    entry.id,
                    entry.shift_id.as_str(),
                    format_timestamp(entry.clock_in),
                    entry.clock_out.map(format_timestamp),
                    entry.hourly_rate,
                    entry.worked_minutes,
                    entry.pay,
                    entry.completion_method.as_str(),
                ],
            )
            .map_err(DbError::from)?;
        Ok(())
    }

    fn close_timesheet_entry(&self, id: &str, clock_out: DateTime<Utc>) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE timesheet_entries SET clock_out = ? WHERE id = ? AND clock_out IS NULL",
                params![format_timestamp(clock_out), id],
            )
            .map_err(DbError::from)?;
        if changed == 0 {
            return Err(DbError::InvalidRecord {
                id: id.to_string(),
                message: "no open timesheet entry".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn apply_reconciliation(
        &self,
        shift: &ShiftId,
        reconciliation: &Reconciliation,
        status: Option<ShiftStatus>,
    ) -> Result<(), StoreError> {
        Ok(self.apply_reconciliation_rows(shift, reconciliation, status)?)
    }

    fn append_events(&self, events: &[DomainEvent]) -> Result<(), StoreError> {
        Ok(self.append_event_rows(events)?)
    }
}
