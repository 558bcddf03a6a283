//! Interfaces to the collaborators the engines depend on.
//!
//! Document storage, the meeting-room provider and the deferred-task queue
//! live outside this crate. Adapters implement these traits; the engines only
//! ever see the canonical shapes defined here.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contact::Contact;
use crate::event::DomainEvent;
use crate::host::Host;
use crate::hub::HubMeeting;
use crate::interval::TimeInterval;
use crate::lifecycle::TaskPayload;
use crate::reconcile::Reconciliation;
use crate::shift::{HubAssignment, MeetingRef, Shift, TimesheetEntry};
use crate::types::{HostId, HubId, ShiftId, ShiftStatus, TaskPhase, UserId};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Storage errors surfaced to the engines.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Worth retrying (lock contention, dropped connection).
    #[error("store temporarily unavailable: {0}")]
    Transient(#[source] BoxError),
    #[error("store error: {0}")]
    Backend(#[source] BoxError),
    /// A stored record could not be decoded.
    #[error("corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },
}

impl StoreError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Bounded retry for transient store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping.
    pub const fn none() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Runs `f`, retrying transient failures with exponential backoff.
    pub fn run<T>(
        &self,
        operation: &str,
        mut f: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let attempts = self.attempts.max(1);
        let mut delay = self.backoff;
        for attempt in 1..=attempts {
            match f() {
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %err,
                        "transient store error, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    delay = delay.saturating_mul(2);
                }
                result => return result,
            }
        }
        unreachable!("loop returns on the final attempt")
    }
}

/// Document-store operations used by the engines.
///
/// Methods that take several records must apply them atomically.
pub trait ShiftStore {
    fn get_shift(&self, id: &ShiftId) -> Result<Option<Shift>, StoreError>;
    fn insert_shift(&self, shift: &Shift) -> Result<(), StoreError>;
    /// Moves a shift. With `clear_meeting` the direct meeting reference is
    /// dropped in the same write.
    fn update_shift_times(
        &self,
        id: &ShiftId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        clear_meeting: bool,
    ) -> Result<(), StoreError>;
    /// Sets `to` only if the current status is one of `from`. Returns whether it changed.
    fn transition_status(
        &self,
        id: &ShiftId,
        from: &[ShiftStatus],
        to: ShiftStatus,
    ) -> Result<bool, StoreError>;
    fn set_host(&self, id: &ShiftId, host: Option<&HostId>) -> Result<(), StoreError>;
    fn set_meeting(&self, id: &ShiftId, meeting: &MeetingRef) -> Result<(), StoreError>;
    /// Records the latest task names. `None` leaves a stored name unchanged.
    fn set_task_names(
        &self,
        id: &ShiftId,
        start_task: Option<&str>,
        end_task: Option<&str>,
    ) -> Result<(), StoreError>;
    fn clear_hub_assignment(&self, id: &ShiftId) -> Result<(), StoreError>;

    /// Scheduled/active shifts starting inside `window` with neither a hub nor a direct host,
    /// ordered by start then id.
    fn hub_candidates(&self, window: &TimeInterval) -> Result<Vec<Shift>, StoreError>;
    /// Scheduled/active shifts whose start or end falls inside `window`.
    fn shifts_with_boundary_in(&self, window: &TimeInterval) -> Result<Vec<Shift>, StoreError>;
    /// Scheduled/active shifts that ended at or before `cutoff`.
    fn overdue_shifts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Shift>, StoreError>;

    /// Intervals booked on `host` that overlap `window`: direct shifts in a committed
    /// status and hubs that are scheduled or started. `exclude` skips one shift.
    fn committed_intervals(
        &self,
        host: &HostId,
        window: &TimeInterval,
        exclude: Option<&ShiftId>,
    ) -> Result<Vec<TimeInterval>, StoreError>;

    fn active_hosts(&self) -> Result<Vec<Host>, StoreError>;
    fn touch_host(&self, id: &HostId, at: DateTime<Utc>) -> Result<(), StoreError>;

    fn contact(&self, id: &UserId) -> Result<Option<Contact>, StoreError>;

    /// Scheduled or started hubs whose meeting starts exactly at `meeting_start`.
    fn open_hubs(&self, meeting_start: DateTime<Utc>) -> Result<Vec<HubMeeting>, StoreError>;
    fn insert_hub(&self, hub: &HubMeeting) -> Result<(), StoreError>;
    fn delete_hub(&self, id: &HubId) -> Result<(), StoreError>;
    /// Records the provider meeting on the hub and the shift assignments, in one batch.
    fn attach_hub_meeting(
        &self,
        id: &HubId,
        meeting: &MeetingRef,
        assignments: &[(ShiftId, HubAssignment)],
    ) -> Result<(), StoreError>;
    /// Appends members to an existing hub, increments its seat count and records
    /// the shift assignments, in one batch.
    fn join_hub(
        &self,
        id: &HubId,
        seats: usize,
        assignments: &[(ShiftId, HubAssignment)],
    ) -> Result<(), StoreError>;

    fn timesheet_entries(&self, shift: &ShiftId) -> Result<Vec<TimesheetEntry>, StoreError>;
    fn insert_timesheet_entry(&self, entry: &TimesheetEntry) -> Result<(), StoreError>;
    fn close_timesheet_entry(&self, id: &str, clock_out: DateTime<Utc>) -> Result<(), StoreError>;
    /// Writes entry totals and shift totals in one batch. `status` is applied
    /// only when given and the stored shift is not cancelled.
    fn apply_reconciliation(
        &self,
        shift: &ShiftId,
        reconciliation: &Reconciliation,
        status: Option<ShiftStatus>,
    ) -> Result<(), StoreError>;

    fn append_events(&self, events: &[DomainEvent]) -> Result<(), StoreError>;
}

/// A breakout room created with a hub meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakoutRoom {
    pub name: String,
    /// Emails pre-assigned to this room.
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub topic: String,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub host: HostId,
    #[serde(default)]
    pub breakout_rooms: Vec<BreakoutRoom>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveParticipant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum MeetingError {
    #[error("meeting provider misconfigured: {0}")]
    Misconfigured(String),
    #[error("meeting provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("meeting provider unreachable: {0}")]
    Transport(String),
}

/// The external meeting-room provider.
pub trait MeetingProvider {
    fn create_meeting(&self, request: &MeetingRequest) -> Result<MeetingRef, MeetingError>;
    fn list_participants(&self, meeting_id: &str) -> Result<Vec<LiveParticipant>, MeetingError>;
    fn mute_participant(&self, meeting_id: &str, participant_id: &str)
    -> Result<(), MeetingError>;
    fn remove_participant(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<(), MeetingError>;
}

/// A deferred callback to register with the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    pub phase: TaskPhase,
    pub fire_at: DateTime<Utc>,
    pub callback_url: String,
    pub payload: TaskPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Created,
    /// A task with this name already exists. Treated as success.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task queue misconfigured: {0}")]
    Misconfigured(String),
    #[error("task {name} is beyond the queue's scheduling horizon")]
    BeyondHorizon { name: String },
    #[error("task queue unreachable: {0}")]
    Transport(String),
}

/// The deferred-task queue. Names are the idempotency boundary.
pub trait TaskQueue {
    fn schedule(&self, task: &TaskRequest) -> Result<ScheduleOutcome, QueueError>;
    fn delete(&self, name: &str) -> Result<DeleteOutcome, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    fn transient() -> StoreError {
        StoreError::Transient("busy".into())
    }

    #[test]
    fn retry_recovers_from_transient_errors() {
        let calls = Cell::new(0);
        let result = RetryPolicy {
            attempts: 3,
            backoff: Duration::ZERO,
        }
        .run("test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(transient()) } else { Ok(7) }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retry_gives_up_after_bounded_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy {
            attempts: 2,
            backoff: Duration::ZERO,
        }
        .run("test", || {
            calls.set(calls.get() + 1);
            Err(transient())
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn retry_does_not_repeat_permanent_errors() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::default().run("test", || {
            calls.set(calls.get() + 1);
            Err(StoreError::Backend("constraint".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
