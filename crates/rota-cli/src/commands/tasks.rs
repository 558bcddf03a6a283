//! Deferred task callbacks and the local queue runner.

use std::io::Write;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use clap::Args;
use rota_core::{
    EngineConfig, Lifecycle, ShiftId, SkipReason, TaskOutcome, TaskPayload, TaskPhase, TaskQueue,
};
use rota_db::Database;

use super::util::{format_time, parse_datetime};
use crate::adapters::Services;

/// A task firing as the queue would deliver it.
#[derive(Debug, Args)]
pub struct FireArgs {
    pub shift_id: String,

    /// Start time the task was scheduled for. Stale snapshots are skipped.
    #[arg(long)]
    pub shift_start: Option<String>,

    /// End time the task was scheduled for.
    #[arg(long)]
    pub shift_end: Option<String>,
}

const fn skip_label(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::ShiftNotFound => "shift not found",
        SkipReason::Stale => "shift was moved",
        SkipReason::OutsideLegacyWindow => "outside the legacy firing window",
        SkipReason::NotScheduled => "shift is not scheduled",
        SkipReason::Cancelled => "shift is cancelled",
        SkipReason::AlreadyFinal => "shift is already final",
    }
}

fn describe(outcome: TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Applied(status) => format!("applied, shift is now {status}"),
        TaskOutcome::Skipped(reason) => format!("skipped, {}", skip_label(reason)),
    }
}

fn dispatch(
    lifecycle: &Lifecycle<'_>,
    phase: TaskPhase,
    payload: &TaskPayload,
    now: DateTime<Utc>,
) -> rota_core::Result<TaskOutcome> {
    match phase {
        TaskPhase::Start => lifecycle.handle_start_task(payload, now),
        TaskPhase::End => lifecycle.handle_end_task(payload, now),
    }
}

/// Handles one start or end callback.
pub fn fire<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    engine: &EngineConfig,
    phase: TaskPhase,
    args: &FireArgs,
    now: DateTime<Utc>,
) -> Result<()> {
    let payload = TaskPayload {
        shift_id: ShiftId::new(args.shift_id.as_str())?,
        shift_start: args
            .shift_start
            .as_deref()
            .map(|s| parse_datetime(s, now))
            .transpose()?,
        shift_end: args
            .shift_end
            .as_deref()
            .map(|s| parse_datetime(s, now))
            .transpose()?,
    };
    let lifecycle = Lifecycle::new(db, services.queue(db), engine);
    let outcome = dispatch(&lifecycle, phase, &payload, now)?;
    writeln!(
        writer,
        "{phase} task for shift {}: {}",
        payload.shift_id,
        describe(outcome)
    )?;
    Ok(())
}

/// Schedules tasks for shifts that have come within the queue horizon.
pub fn rescan<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    engine: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    let report = Lifecycle::new(db, services.queue(db), engine).rescan(now)?;
    writeln!(
        writer,
        "Checked {} shifts: {} tasks scheduled, {} already queued",
        report.shifts, report.created, report.existing
    )?;
    for id in &report.failed {
        writeln!(writer, "Failed: {id}")?;
    }
    Ok(())
}

/// Fires every due task in the local queue.
///
/// A task is removed once its handler returns, skipped or applied. Handler
/// errors leave it queued for the next run.
pub fn run_due<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    engine: &EngineConfig,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<()> {
    if !services.uses_local_queue() {
        bail!("run-due drains the local queue; the configured hosted queue calls back on its own");
    }
    let lifecycle = Lifecycle::new(db, db, engine);
    let due = db.due_tasks(now, limit)?;
    let mut failed = 0usize;
    for task in &due {
        match dispatch(&lifecycle, task.phase, &task.payload, now) {
            Ok(outcome) => {
                db.delete(&task.name)?;
                writeln!(
                    writer,
                    "{} (due {}): {}",
                    task.name,
                    format_time(task.fire_at),
                    describe(outcome)
                )?;
            }
            Err(err) => {
                failed += 1;
                tracing::warn!(task = %task.name, error = %err, "task handler failed");
                writeln!(writer, "{}: failed, {err}", task.name)?;
            }
        }
    }
    writeln!(writer, "Ran {} due tasks ({failed} failed)", due.len())?;
    Ok(())
}
