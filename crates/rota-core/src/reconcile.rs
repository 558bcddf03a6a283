//! Worked-time reconciliation.
//!
//! Turns clock-in/out records into billable minutes capped to the scheduled
//! window, and classifies the shift as fully completed, partially completed
//! or missed.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::allocation::ceil_minutes;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::{DomainEvent, publish};
use crate::interval::TimeInterval;
use crate::ports::ShiftStore;
use crate::shift::{Shift, TimesheetEntry};
use crate::types::{CompletionMethod, ShiftId, ShiftStatus};

/// Clock evidence recorded on the shift itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShiftClock {
    pub clock_in: Option<DateTime<Utc>>,
    pub clock_out: Option<DateTime<Utc>>,
}

impl ShiftClock {
    pub const fn of(shift: &Shift) -> Self {
        Self {
            clock_in: shift.clock_in_at,
            clock_out: shift.clock_out_at,
        }
    }
}

/// Computed totals for one shift.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    /// `max(1, round(duration in minutes))`.
    pub scheduled_minutes: i64,
    pub worked_minutes: i64,
    pub total_pay: f64,
    pub status: ShiftStatus,
    /// At least one entry was closed automatically at the scheduled end.
    pub auto_clock_out: bool,
    /// Entries with clock-outs, worked minutes and pay filled in.
    pub entries: Vec<TimesheetEntry>,
}

/// Reconciles `entries` against the scheduled `window`.
///
/// Overlapping entries are counted once in `worked_minutes`. Each entry's own
/// pay uses its clamped duration, so per-entry figures can add up to more
/// than the shift total when entries overlap.
///
/// Deterministic in its inputs: a synthesized clock-out is only added where
/// the stored entry has none, so reconciling twice gives the same totals.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn reconcile(
    window: &TimeInterval,
    entries: &[TimesheetEntry],
    shift_clock: ShiftClock,
    rate: f64,
) -> Reconciliation {
    let scheduled = window.duration();
    // Rounded, while worked time rounds up: a fractional schedule can report
    // worked_minutes above scheduled_minutes.
    let scheduled_minutes =
        ((scheduled.num_milliseconds() as f64 / 60_000.0).round() as i64).max(1);

    let mut closed: Vec<TimesheetEntry> = entries
        .iter()
        .cloned()
        .map(|mut entry| {
            if entry.clock_out.is_none() {
                entry.clock_out = Some(window.end.max(entry.clock_in));
                entry.completion_method = CompletionMethod::Auto;
            }
            entry
        })
        .collect();
    closed.sort_by(|a, b| a.clock_in.cmp(&b.clock_in).then_with(|| a.id.cmp(&b.id)));
    let auto_clock_out = closed
        .iter()
        .any(|e| e.completion_method == CompletionMethod::Auto);

    let mut worked = Duration::zero();
    let mut total_pay = 0.0;
    let mut last_end: Option<DateTime<Utc>> = None;
    for entry in &mut closed {
        let clock_out = entry.clock_out.unwrap_or(window.end);
        let start = entry.clock_in.max(window.start);
        let end = clock_out.min(window.end);

        let counted_from = last_end.map_or(start, |last| start.max(last));
        if end > counted_from {
            worked += end - counted_from;
        }
        if end > start {
            last_end = Some(last_end.map_or(end, |last| last.max(end)));
        }

        let billable = (end - start).max(Duration::zero()).min(scheduled);
        entry.worked_minutes = ceil_minutes(billable);
        entry.pay = pay_for(billable, entry.hourly_rate.unwrap_or(rate));
        total_pay += entry.pay;
    }

    let has_evidence = !closed.is_empty() || shift_clock.clock_in.is_some();
    if let (true, Some(clock_in)) = (closed.is_empty(), shift_clock.clock_in) {
        let start = clock_in.max(window.start);
        let end = shift_clock.clock_out.unwrap_or(window.end).min(window.end);
        let span = (end - start).max(Duration::zero());
        worked = span;
        total_pay = pay_for(span, rate);
    }

    let worked_minutes = ceil_minutes(worked);
    let status = if !has_evidence {
        ShiftStatus::Missed
    } else if worked_minutes >= scheduled_minutes {
        ShiftStatus::FullyCompleted
    } else {
        ShiftStatus::PartiallyCompleted
    };

    Reconciliation {
        scheduled_minutes,
        worked_minutes,
        total_pay: round_cents(total_pay),
        status,
        auto_clock_out,
        entries: closed,
    }
}

#[allow(clippy::cast_precision_loss)]
fn pay_for(billable: Duration, rate: f64) -> f64 {
    round_cents(billable.num_milliseconds() as f64 / 3_600_000.0 * rate)
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Shifts finalized by one sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub finalized: Vec<(ShiftId, ShiftStatus)>,
    pub failed: Vec<ShiftId>,
}

pub struct Reconciler<'a> {
    store: &'a dyn ShiftStore,
    config: &'a EngineConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn ShiftStore, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    fn load(&self, shift_id: &ShiftId) -> Result<Shift> {
        self.store
            .get_shift(shift_id)?
            .ok_or_else(|| Error::ShiftNotFound(shift_id.clone()))
    }

    /// Reconciles a shift and persists entries, totals and status.
    ///
    /// Returns `None` for cancelled shifts. An already-final status is kept;
    /// only the totals are rewritten.
    pub fn finalize(&self, shift_id: &ShiftId) -> Result<Option<Reconciliation>> {
        let shift = self.load(shift_id)?;
        if shift.status == ShiftStatus::Cancelled {
            tracing::debug!(shift_id = %shift.id, "skipping reconciliation of cancelled shift");
            return Ok(None);
        }

        let entries = self
            .config
            .retry_policy()
            .run("timesheet_entries", || self.store.timesheet_entries(&shift.id))?;
        let reconciliation = reconcile(
            &shift.interval(),
            &entries,
            ShiftClock::of(&shift),
            shift.pay_rate,
        );
        let status = (!shift.status.is_terminal()).then_some(reconciliation.status);
        self.store
            .apply_reconciliation(&shift.id, &reconciliation, status)?;

        tracing::info!(
            shift_id = %shift.id,
            worked = reconciliation.worked_minutes,
            scheduled = reconciliation.scheduled_minutes,
            status = %reconciliation.status,
            "reconciled shift"
        );
        if let Some(status) = status {
            let mut events = vec![DomainEvent::ShiftReconciled {
                shift_id: shift.id.clone(),
                status,
                worked_minutes: reconciliation.worked_minutes,
                scheduled_minutes: reconciliation.scheduled_minutes,
                auto_clock_out: reconciliation.auto_clock_out,
            }];
            if status == ShiftStatus::Missed {
                events.push(DomainEvent::ShiftMissed {
                    shift_id: shift.id.clone(),
                    organizer_id: shift.organizer_id.to_string(),
                });
            }
            publish(self.store, &events);
        }
        Ok(Some(reconciliation))
    }

    /// Finalizes scheduled/active shifts whose end passed more than the grace period ago.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = now - Duration::minutes(self.config.reconcile.sweep_grace_minutes);
        let overdue = self
            .config
            .retry_policy()
            .run("overdue_shifts", || self.store.overdue_shifts(cutoff))?;

        let mut report = SweepReport::default();
        for shift in overdue {
            match self.finalize(&shift.id) {
                Ok(Some(reconciliation)) => {
                    report.finalized.push((shift.id, reconciliation.status));
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        shift_id = %shift.id,
                        error = %err,
                        "failed to finalize overdue shift"
                    );
                    report.failed.push(shift.id);
                }
            }
        }
        Ok(report)
    }

    /// Opens a manual timesheet entry. Returns the open entry if there already is one.
    pub fn clock_in(&self, shift_id: &ShiftId, at: DateTime<Utc>) -> Result<TimesheetEntry> {
        let shift = self.load(shift_id)?;
        if shift.status.is_terminal() {
            return Err(Error::ShiftClosed {
                id: shift.id,
                status: shift.status,
            });
        }
        let entries = self.store.timesheet_entries(&shift.id)?;
        if let Some(open) = entries.into_iter().find(|e| e.clock_out.is_none()) {
            tracing::debug!(shift_id = %shift.id, entry = %open.id, "already clocked in");
            return Ok(open);
        }
        let entry = TimesheetEntry::open(
            format!("{}-{}", shift.id, at.timestamp_millis()),
            shift.id.clone(),
            at,
        );
        self.store.insert_timesheet_entry(&entry)?;
        tracing::info!(shift_id = %shift.id, entry = %entry.id, "clocked in");
        Ok(entry)
    }

    /// Closes the open timesheet entry.
    pub fn clock_out(&self, shift_id: &ShiftId, at: DateTime<Utc>) -> Result<TimesheetEntry> {
        let shift = self.load(shift_id)?;
        let mut entry = self
            .store
            .timesheet_entries(&shift.id)?
            .into_iter()
            .find(|e| e.clock_out.is_none())
            .ok_or_else(|| Error::NotClockedIn(shift.id.clone()))?;
        if at < entry.clock_in {
            return Err(Error::InvalidInterval);
        }
        self.store.close_timesheet_entry(&entry.id, at)?;
        entry.clock_out = Some(at);
        tracing::info!(shift_id = %shift.id, entry = %entry.id, "clocked out");
        Ok(entry)
    }
}
