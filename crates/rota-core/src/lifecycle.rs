//! Shift lifecycle driven by deferred tasks.
//!
//! Every create or edit schedules a start task and an end task whose names
//! embed the target epoch second. An edit therefore produces new names and the
//! old tasks stay queued; the handlers compare each payload's time snapshot
//! with the stored shift and ignore stale firings. Handlers are safe under
//! at-least-once delivery because every transition is a compare-and-set on
//! the stored status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::allocation::HostAllocator;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::{DomainEvent, publish};
use crate::hub::floor_to_bucket;
use crate::interval::TimeInterval;
use crate::ports::{DeleteOutcome, ScheduleOutcome, ShiftStore, TaskQueue, TaskRequest};
use crate::reconcile::Reconciler;
use crate::shift::Shift;
use crate::types::{ShiftId, ShiftStatus, TaskPhase, UserId};

/// Body of a lifecycle task.
///
/// Payloads queued before snapshots existed carry only the shift id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub shift_id: ShiftId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_end: Option<DateTime<Utc>>,
}

impl TaskPayload {
    /// Payload carrying the shift's current times.
    pub fn snapshot(shift: &Shift) -> Self {
        Self {
            shift_id: shift.id.clone(),
            shift_start: Some(shift.start),
            shift_end: Some(shift.end),
        }
    }
}

/// `shift-{id}-{phase}-{epochSecond}`, restricted to `[A-Za-z0-9_-]`.
pub fn task_name(shift_id: &ShiftId, phase: TaskPhase, target: DateTime<Utc>) -> String {
    format!("shift-{shift_id}-{phase}-{}", target.timestamp())
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Who is asking for a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Actor {
    pub const fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    pub fn may_change(&self, shift: &Shift) -> bool {
        self.is_admin || shift.is_organizer(&self.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ShiftNotFound,
    /// Snapshot differs from the stored time by more than the tolerance.
    Stale,
    /// Payload without a snapshot, and the stored time is far from now.
    OutsideLegacyWindow,
    NotScheduled,
    Cancelled,
    AlreadyFinal,
}

/// Result of handling one task firing. Skips are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TaskOutcome {
    Applied(ShiftStatus),
    Skipped(SkipReason),
}

/// Tasks registered for one shift.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub created: Vec<String>,
    /// Names the queue already had.
    pub existing: Vec<String>,
    /// Phases whose target lies past the queue horizon; a later rescan picks them up.
    pub deferred: Vec<TaskPhase>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RescanReport {
    pub shifts: usize,
    pub created: usize,
    pub existing: usize,
    pub failed: Vec<ShiftId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub already_cancelled: bool,
    pub tasks_deleted: usize,
}

pub struct Lifecycle<'a> {
    store: &'a dyn ShiftStore,
    queue: &'a dyn TaskQueue,
    config: &'a EngineConfig,
}

impl<'a> Lifecycle<'a> {
    pub fn new(
        store: &'a dyn ShiftStore,
        queue: &'a dyn TaskQueue,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    fn load(&self, shift_id: &ShiftId) -> Result<Shift> {
        self.config
            .retry_policy()
            .run("get_shift", || self.store.get_shift(shift_id))?
            .ok_or_else(|| Error::ShiftNotFound(shift_id.clone()))
    }

    /// Schedules the start and end tasks for the shift's current times.
    ///
    /// The start task is only scheduled while the shift is `scheduled`.
    /// Terminal shifts are left alone. A name the queue already has counts as
    /// success, so repeating this is harmless.
    pub fn on_shift_created_or_edited(
        &self,
        shift_id: &ShiftId,
        now: DateTime<Utc>,
    ) -> Result<ScheduleReport> {
        let shift = self.load(shift_id)?;
        if shift.end <= shift.start {
            return Err(Error::InvalidInterval);
        }
        let mut report = ScheduleReport::default();
        if shift.status.is_terminal() {
            tracing::debug!(
                shift_id = %shift.id,
                status = %shift.status,
                "not scheduling tasks for closed shift"
            );
            return Ok(report);
        }

        let cfg = &self.config.lifecycle;
        let horizon = now + Duration::days(cfg.queue_horizon_days);
        let earliest = now + Duration::seconds(cfg.min_lead_seconds);
        let payload = TaskPayload::snapshot(&shift);

        let mut phases = Vec::with_capacity(2);
        if shift.status == ShiftStatus::Scheduled {
            phases.push((TaskPhase::Start, shift.start));
        }
        phases.push((TaskPhase::End, shift.end));

        let mut start_task = None;
        let mut end_task = None;
        for (phase, target) in phases {
            if target > horizon {
                tracing::debug!(
                    shift_id = %shift.id,
                    %phase,
                    %target,
                    "task target beyond queue horizon"
                );
                report.deferred.push(phase);
                continue;
            }
            let name = task_name(&shift.id, phase, target);
            let request = TaskRequest {
                name: name.clone(),
                phase,
                fire_at: target.max(earliest),
                callback_url: format!(
                    "{}/tasks/{phase}",
                    cfg.callback_base_url.trim_end_matches('/')
                ),
                payload: payload.clone(),
            };
            match self.queue.schedule(&request)? {
                ScheduleOutcome::Created => {
                    tracing::info!(
                        shift_id = %shift.id,
                        task = %name,
                        fire_at = %request.fire_at,
                        "scheduled task"
                    );
                    report.created.push(name.clone());
                }
                ScheduleOutcome::AlreadyExists => {
                    tracing::debug!(shift_id = %shift.id, task = %name, "task already scheduled");
                    report.existing.push(name.clone());
                }
            }
            match phase {
                TaskPhase::Start => start_task = Some(name),
                TaskPhase::End => end_task = Some(name),
            }
        }

        if start_task.is_some() || end_task.is_some() {
            self.store
                .set_task_names(&shift.id, start_task.as_deref(), end_task.as_deref())?;
        }
        Ok(report)
    }

    /// Moves a shift and reschedules its tasks.
    ///
    /// A direct host is re-validated for the new interval, ignoring the
    /// shift's own booking; a hub assignment is dropped when the shift moves
    /// to another bucket so the next sweep can place it again.
    pub fn reschedule(
        &self,
        shift_id: &ShiftId,
        interval: &TimeInterval,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<ScheduleReport> {
        if interval.end <= interval.start {
            return Err(Error::InvalidInterval);
        }
        let shift = self.load(shift_id)?;
        if !actor.may_change(&shift) {
            return Err(Error::Forbidden(shift.id));
        }
        if shift.status.is_terminal() {
            return Err(Error::ShiftClosed {
                id: shift.id,
                status: shift.status,
            });
        }

        let moved = Shift {
            start: interval.start,
            end: interval.end,
            ..shift.clone()
        };
        let mut host_changed = false;
        if let Some(previous) = &shift.host_id {
            let allocator = HostAllocator::new(self.store, self.config);
            let host = allocator.assign_host(&moved, now)?;
            if &host != previous {
                host_changed = true;
                tracing::info!(
                    shift_id = %shift.id,
                    from = %previous,
                    to = %host,
                    "host changed after reschedule"
                );
            }
        }
        // A direct meeting is bound to its host and start time.
        let times_changed = shift.start != interval.start || shift.end != interval.end;
        let clear_meeting = shift.meeting.is_some() && (times_changed || host_changed);
        self.store
            .update_shift_times(&shift.id, interval.start, interval.end, clear_meeting)?;
        if clear_meeting {
            tracing::info!(shift_id = %shift.id, "dropped direct meeting after reschedule");
        }

        if let Some(hub) = &shift.hub {
            let width = Duration::minutes(self.config.hub.bucket_minutes.max(1));
            if floor_to_bucket(shift.start, width) != floor_to_bucket(interval.start, width) {
                self.store.clear_hub_assignment(&shift.id)?;
                tracing::info!(
                    shift_id = %shift.id,
                    hub_id = %hub.hub_id,
                    "left hub after moving to another bucket"
                );
            }
        }

        self.on_shift_created_or_edited(&shift.id, now)
    }

    /// Cancels a shift and deletes its pending tasks on a best-effort basis.
    pub fn on_shift_cancelled(
        &self,
        shift_id: &ShiftId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome> {
        let shift = self.load(shift_id)?;
        if !actor.may_change(&shift) {
            return Err(Error::Forbidden(shift.id));
        }
        if shift.status == ShiftStatus::Cancelled {
            return Ok(CancelOutcome {
                already_cancelled: true,
                tasks_deleted: 0,
            });
        }
        let changed = !shift.status.is_terminal()
            && self.store.transition_status(
                &shift.id,
                &ShiftStatus::COMMITTED,
                ShiftStatus::Cancelled,
            )?;
        if !changed {
            let current = self.load(shift_id)?.status;
            if current == ShiftStatus::Cancelled {
                return Ok(CancelOutcome {
                    already_cancelled: true,
                    tasks_deleted: 0,
                });
            }
            return Err(Error::InvalidTransition {
                id: shift.id,
                from: current,
                to: ShiftStatus::Cancelled,
            });
        }
        tracing::info!(shift_id = %shift.id, "cancelled shift");
        publish(
            self.store,
            &[DomainEvent::ShiftCancelled {
                shift_id: shift.id.clone(),
                at: now,
            }],
        );

        let mut tasks_deleted = 0;
        for name in [&shift.start_task, &shift.end_task].into_iter().flatten() {
            match self.queue.delete(name) {
                Ok(DeleteOutcome::Deleted) => tasks_deleted += 1,
                Ok(DeleteOutcome::NotFound) => {
                    tracing::debug!(task = %name, "task already gone");
                }
                Err(err) => {
                    tracing::warn!(
                        shift_id = %shift.id,
                        task = %name,
                        error = %err,
                        "failed to delete task"
                    );
                }
            }
        }
        Ok(CancelOutcome {
            already_cancelled: false,
            tasks_deleted,
        })
    }

    fn staleness(
        &self,
        snapshot: Option<DateTime<Utc>>,
        current: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<SkipReason> {
        let cfg = &self.config.lifecycle;
        match snapshot {
            Some(snapshot) => ((snapshot - current).abs()
                > Duration::seconds(cfg.stale_tolerance_seconds))
            .then_some(SkipReason::Stale),
            // Deliberately loose: only for tasks queued before payloads had snapshots.
            None => ((current - now).abs() > Duration::minutes(cfg.legacy_tolerance_minutes))
                .then_some(SkipReason::OutsideLegacyWindow),
        }
    }

    /// Flips a scheduled shift to active.
    pub fn handle_start_task(
        &self,
        payload: &TaskPayload,
        now: DateTime<Utc>,
    ) -> Result<TaskOutcome> {
        let Some(shift) = self.store.get_shift(&payload.shift_id)? else {
            return Ok(skip(&payload.shift_id, TaskPhase::Start, SkipReason::ShiftNotFound));
        };
        if let Some(reason) = self.staleness(payload.shift_start, shift.start, now) {
            return Ok(skip(&shift.id, TaskPhase::Start, reason));
        }
        match shift.status {
            ShiftStatus::Scheduled => {}
            ShiftStatus::Cancelled => {
                return Ok(skip(&shift.id, TaskPhase::Start, SkipReason::Cancelled));
            }
            _ => return Ok(skip(&shift.id, TaskPhase::Start, SkipReason::NotScheduled)),
        }
        if !self.store.transition_status(
            &shift.id,
            &[ShiftStatus::Scheduled],
            ShiftStatus::Active,
        )? {
            return Ok(skip(&shift.id, TaskPhase::Start, SkipReason::NotScheduled));
        }
        tracing::info!(shift_id = %shift.id, "shift started");
        publish(
            self.store,
            &[DomainEvent::ShiftActivated {
                shift_id: shift.id.clone(),
                at: now,
            }],
        );
        Ok(TaskOutcome::Applied(ShiftStatus::Active))
    }

    /// Reconciles worked time and moves the shift to its final status.
    pub fn handle_end_task(
        &self,
        payload: &TaskPayload,
        now: DateTime<Utc>,
    ) -> Result<TaskOutcome> {
        let Some(shift) = self.store.get_shift(&payload.shift_id)? else {
            return Ok(skip(&payload.shift_id, TaskPhase::End, SkipReason::ShiftNotFound));
        };
        if let Some(reason) = self.staleness(payload.shift_end, shift.end, now) {
            return Ok(skip(&shift.id, TaskPhase::End, reason));
        }
        if shift.status == ShiftStatus::Cancelled {
            return Ok(skip(&shift.id, TaskPhase::End, SkipReason::Cancelled));
        }
        if shift.status.is_terminal() {
            return Ok(skip(&shift.id, TaskPhase::End, SkipReason::AlreadyFinal));
        }
        match Reconciler::new(self.store, self.config).finalize(&shift.id)? {
            Some(reconciliation) => Ok(TaskOutcome::Applied(reconciliation.status)),
            None => Ok(skip(&shift.id, TaskPhase::End, SkipReason::Cancelled)),
        }
    }

    /// Schedules tasks for shifts whose start or end has entered the queue horizon.
    pub fn rescan(&self, now: DateTime<Utc>) -> Result<RescanReport> {
        let window = TimeInterval::unchecked(
            now,
            now + Duration::days(self.config.lifecycle.queue_horizon_days),
        );
        let shifts = self
            .config
            .retry_policy()
            .run("shifts_with_boundary_in", || {
                self.store.shifts_with_boundary_in(&window)
            })?;

        let mut report = RescanReport {
            shifts: shifts.len(),
            ..RescanReport::default()
        };
        for shift in shifts {
            match self.on_shift_created_or_edited(&shift.id, now) {
                Ok(scheduled) => {
                    report.created += scheduled.created.len();
                    report.existing += scheduled.existing.len();
                }
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) => {
                    tracing::warn!(shift_id = %shift.id, error = %err, "rescan failed for shift");
                    report.failed.push(shift.id);
                }
            }
        }
        tracing::info!(shifts = report.shifts, created = report.created, "rescan finished");
        Ok(report)
    }
}

fn skip(shift_id: &ShiftId, phase: TaskPhase, reason: SkipReason) -> TaskOutcome {
    tracing::info!(shift_id = %shift_id, %phase, ?reason, "ignoring task firing");
    TaskOutcome::Skipped(reason)
}
