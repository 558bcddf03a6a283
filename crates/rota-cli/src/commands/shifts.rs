//! Shift creation, edits and time tracking.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Args;
use rota_core::{
    Actor, DirectMeeting, EngineConfig, Error, HostAllocator, Lifecycle, Reconciler,
    ScheduleReport, Shift, ShiftId, ShiftStatus, ShiftStore, TimeInterval, TimesheetEntry,
    UserId,
};
use rota_db::Database;
use serde::Serialize;
use uuid::Uuid;

use super::util::{format_interval, format_time, parse_datetime, parse_interval, write_json};
use crate::adapters::Services;

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Shift id. A random one is generated when omitted.
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long)]
    pub organizer: String,

    #[arg(long)]
    pub organizer_name: Option<String>,

    /// Participant user id. Repeat for several participants.
    #[arg(long = "participant")]
    pub participants: Vec<String>,

    /// Participant display name, in the same order as --participant.
    #[arg(long = "participant-name")]
    pub participant_names: Vec<String>,

    #[arg(long)]
    pub start: String,

    #[arg(long)]
    pub end: String,

    /// Hourly pay rate.
    #[arg(long, default_value_t = 0.0)]
    pub rate: f64,

    /// Reserve a dedicated host and create the meeting now instead of
    /// waiting for the hub sweep.
    #[arg(long)]
    pub direct: bool,
}

/// Who is making a change. Only the organizer or an admin may edit or cancel.
#[derive(Debug, Args)]
pub struct ActorArgs {
    #[arg(long = "as", value_name = "USER")]
    pub user: String,

    #[arg(long)]
    pub admin: bool,
}

impl ActorArgs {
    fn actor(&self) -> Result<Actor> {
        Ok(Actor {
            user_id: UserId::new(self.user.as_str())?,
            is_admin: self.admin,
        })
    }
}

#[derive(Debug, Args)]
pub struct EditArgs {
    pub id: String,

    #[arg(long)]
    pub start: String,

    #[arg(long)]
    pub end: String,

    #[command(flatten)]
    pub actor: ActorArgs,
}

pub fn create<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    engine: &EngineConfig,
    args: &CreateArgs,
    now: DateTime<Utc>,
) -> Result<()> {
    let interval = parse_interval(&args.start, &args.end, now)?;
    let id = match &args.id {
        Some(id) => ShiftId::new(id.as_str())?,
        None => ShiftId::new(Uuid::new_v4().to_string())?,
    };
    if db.get_shift(&id)?.is_some() {
        bail!("shift {id} already exists; use 'rota shifts edit' to move it");
    }
    let participants = args
        .participants
        .iter()
        .map(|p| UserId::new(p.as_str()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut shift = Shift::new(
        id,
        UserId::new(args.organizer.as_str())?,
        participants,
        interval.start,
        interval.end,
        args.rate,
    );
    shift.organizer_name.clone_from(&args.organizer_name);
    shift.participant_names.clone_from(&args.participant_names);
    db.insert_shift(&shift)
        .with_context(|| format!("failed to save shift {}", shift.id))?;
    writeln!(writer, "Created shift {} ({})", shift.id, format_interval(&interval))?;

    let report = Lifecycle::new(db, services.queue(db), engine)
        .on_shift_created_or_edited(&shift.id, now)?;
    write_schedule(writer, &report)?;

    if args.direct {
        provision_and_report(writer, db, services, engine, &shift.id, now, false)?;
    }
    Ok(())
}

pub fn edit<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    engine: &EngineConfig,
    args: &EditArgs,
    now: DateTime<Utc>,
) -> Result<()> {
    let id = ShiftId::new(args.id.as_str())?;
    let interval = parse_interval(&args.start, &args.end, now)?;
    let actor = args.actor.actor()?;
    let had_meeting = db.get_shift(&id)?.is_some_and(|shift| shift.meeting.is_some());
    let report = Lifecycle::new(db, services.queue(db), engine)
        .reschedule(&id, &interval, &actor, now)?;

    writeln!(writer, "Moved shift {id} to {}", format_interval(&interval))?;
    write_schedule(writer, &report)?;
    let Some(shift) = db.get_shift(&id)? else {
        return Ok(());
    };
    if had_meeting && shift.meeting.is_none() {
        writeln!(writer, "The old meeting no longer matches; creating a new one")?;
        return provision_and_report(writer, db, services, engine, &id, now, false);
    }
    if let Some(host) = &shift.host_id {
        writeln!(writer, "Host: {host}")?;
    }
    Ok(())
}

pub fn cancel<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    engine: &EngineConfig,
    id: &str,
    actor: &ActorArgs,
    now: DateTime<Utc>,
) -> Result<()> {
    let id = ShiftId::new(id)?;
    let outcome = Lifecycle::new(db, services.queue(db), engine).on_shift_cancelled(
        &id,
        &actor.actor()?,
        now,
    )?;
    if outcome.already_cancelled {
        writeln!(writer, "Shift {id} was already cancelled")?;
    } else {
        writeln!(
            writer,
            "Cancelled shift {id} ({} pending tasks removed)",
            outcome.tasks_deleted
        )?;
    }
    Ok(())
}

#[derive(Serialize)]
struct ShiftDetail {
    #[serde(flatten)]
    shift: Shift,
    timesheet: Vec<TimesheetEntry>,
}

pub fn show<W: Write>(writer: &mut W, db: &Database, id: &str, json: bool) -> Result<()> {
    let id = ShiftId::new(id)?;
    let shift = db
        .get_shift(&id)?
        .with_context(|| format!("shift not found: {id}"))?;
    let timesheet = db.timesheet_entries(&id)?;
    if json {
        return write_json(writer, &ShiftDetail { shift, timesheet });
    }

    writeln!(writer, "Shift {}", shift.id)?;
    writeln!(writer, "Status: {}", shift.status)?;
    writeln!(writer, "When: {}", format_interval(&shift.interval()))?;
    writeln!(writer, "Organizer: {} ({})", shift.organizer_label(), shift.organizer_id)?;
    if !shift.participant_ids.is_empty() {
        let ids: Vec<&str> = shift.participant_ids.iter().map(UserId::as_str).collect();
        match shift.participants_label() {
            Some(names) => writeln!(writer, "Participants: {names} ({})", ids.join(", "))?,
            None => writeln!(writer, "Participants: {}", ids.join(", "))?,
        }
    }
    writeln!(writer, "Pay rate: {:.2}/h", shift.pay_rate)?;
    if let Some(host) = &shift.host_id {
        writeln!(writer, "Host: {host}")?;
    }
    if let Some(meeting) = &shift.meeting {
        writeln!(writer, "Meeting: {} {}", meeting.meeting_id, meeting.join_url)?;
    }
    if let Some(hub) = &shift.hub {
        writeln!(
            writer,
            "Hub: {} room \"{}\" ({})",
            hub.hub_id, hub.room_name, hub.routing_mode
        )?;
        for risk in &hub.routing_risks {
            writeln!(writer, "  routing risk: {} {}", risk.user_id, risk.reason)?;
        }
    }
    for (label, task) in [("Start task", &shift.start_task), ("End task", &shift.end_task)] {
        if let Some(task) = task {
            writeln!(writer, "{label}: {task}")?;
        }
    }
    if let Some(worked) = shift.worked_minutes {
        writeln!(writer, "Worked: {worked} min")?;
    }
    if !timesheet.is_empty() {
        writeln!(writer, "Timesheet:")?;
        for entry in &timesheet {
            let out = entry.clock_out.map_or_else(|| "open".to_string(), format_time);
            writeln!(
                writer,
                "- {} - {} {} {} min {:.2}",
                format_time(entry.clock_in),
                out,
                entry.completion_method,
                entry.worked_minutes,
                entry.pay
            )?;
        }
    }
    Ok(())
}

pub fn list<W: Write>(
    writer: &mut W,
    db: &Database,
    status: Option<ShiftStatus>,
    json: bool,
) -> Result<()> {
    let shifts = db.list_shifts(status)?;
    if json {
        return write_json(writer, &shifts);
    }
    if shifts.is_empty() {
        writeln!(writer, "No shifts.")?;
        return Ok(());
    }
    writeln!(
        writer,
        "{:<12} {:<20} {:<20} {:<18} Meeting",
        "ID", "Start", "End", "Status"
    )?;
    for shift in &shifts {
        let meeting = match (&shift.hub, &shift.host_id) {
            (Some(hub), _) => format!("hub {}", hub.hub_id),
            (None, Some(host)) => format!("host {host}"),
            (None, None) => "-".to_string(),
        };
        writeln!(
            writer,
            "{:<12} {:<20} {:<20} {:<18} {meeting}",
            shift.id,
            format_time(shift.start),
            format_time(shift.end),
            shift.status.as_str(),
        )?;
    }
    Ok(())
}

/// Reserves a dedicated host for the shift and creates its meeting.
pub fn provision<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    engine: &EngineConfig,
    id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let id = ShiftId::new(id)?;
    provision_and_report(writer, db, services, engine, &id, now, true)
}

fn provision_and_report<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    engine: &EngineConfig,
    id: &ShiftId,
    now: DateTime<Utc>,
    strict: bool,
) -> Result<()> {
    let allocator = HostAllocator::new(db, engine);
    match allocator.provision_direct_meeting(services.meetings(), id, now) {
        Ok(direct) => write_direct(writer, &direct),
        Err(Error::NoAvailableHost { alternatives }) => {
            writeln!(writer, "No host is free for this shift.")?;
            for slot in &alternatives {
                writeln!(writer, "- free: {}", format_interval(slot))?;
            }
            if strict {
                bail!("no host available");
            }
            writeln!(writer, "The shift stays eligible for a hub meeting.")?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn write_direct<W: Write>(writer: &mut W, direct: &DirectMeeting) -> Result<()> {
    writeln!(writer, "Host: {}", direct.host_id)?;
    match &direct.meeting {
        Some(meeting) => writeln!(writer, "Meeting: {}", meeting.join_url)?,
        None => writeln!(
            writer,
            "Meeting creation failed; the host stays reserved. Retry with 'rota shifts provision'."
        )?,
    }
    Ok(())
}

fn write_schedule<W: Write>(writer: &mut W, report: &ScheduleReport) -> Result<()> {
    for name in &report.created {
        writeln!(writer, "Scheduled task {name}")?;
    }
    for name in &report.existing {
        writeln!(writer, "Task already queued: {name}")?;
    }
    for phase in &report.deferred {
        writeln!(
            writer,
            "Deferred {phase} task: beyond the queue horizon, 'rota tasks rescan' picks it up later"
        )?;
    }
    Ok(())
}

pub fn clock_in<W: Write>(
    writer: &mut W,
    db: &Database,
    engine: &EngineConfig,
    id: &str,
    at: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let id = ShiftId::new(id)?;
    let at = at.map_or(Ok(now), |at| parse_datetime(at, now))?;
    let entry = Reconciler::new(db, engine).clock_in(&id, at)?;
    writeln!(
        writer,
        "Clocked in to shift {id} at {}",
        format_time(entry.clock_in)
    )?;
    Ok(())
}

pub fn clock_out<W: Write>(
    writer: &mut W,
    db: &Database,
    engine: &EngineConfig,
    id: &str,
    at: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let id = ShiftId::new(id)?;
    let at = at.map_or(Ok(now), |at| parse_datetime(at, now))?;
    let entry = Reconciler::new(db, engine).clock_out(&id, at)?;
    let span = TimeInterval::new(entry.clock_in, at)
        .map_or(0, |span| span.duration().num_minutes());
    writeln!(
        writer,
        "Clocked out of shift {id} at {} ({span} min)",
        format_time(at)
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    use crate::Config;
    use crate::commands::testing::{at, db_with_hosts, output};

    fn services() -> Services {
        Services::from_config(&Config::default()).unwrap()
    }

    fn create_args(id: &str, start: &str, end: &str) -> CreateArgs {
        CreateArgs {
            id: Some(id.to_string()),
            organizer: "t1".to_string(),
            organizer_name: Some("Ada".to_string()),
            participants: vec!["p1".to_string()],
            participant_names: vec!["Grace".to_string()],
            start: start.to_string(),
            end: end.to_string(),
            rate: 30.0,
            direct: false,
        }
    }

    fn organizer() -> ActorArgs {
        ActorArgs {
            user: "t1".to_string(),
            admin: false,
        }
    }

    #[test]
    fn create_schedules_start_and_end_tasks() {
        let db = db_with_hosts();
        let services = services();
        let engine = EngineConfig::default();
        let mut buffer = Vec::new();
        create(
            &mut buffer,
            &db,
            &services,
            &engine,
            &create_args("s1", "2026-03-02T14:00:00Z", "2026-03-02T15:00:00Z"),
            at(9, 0),
        )
        .unwrap();

        assert_snapshot!(output(buffer), @r"
        Created shift s1 (2026-03-02T14:00:00Z - 2026-03-02T15:00:00Z)
        Scheduled task shift-s1-start-1772460000
        Scheduled task shift-s1-end-1772463600
        ");
        assert_eq!(db.pending_task_count().unwrap(), 2);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let db = db_with_hosts();
        let services = services();
        let engine = EngineConfig::default();
        let args = create_args("s1", "in 5 hours", "in 6 hours");
        create(&mut Vec::new(), &db, &services, &engine, &args, at(9, 0)).unwrap();
        let err = create(&mut Vec::new(), &db, &services, &engine, &args, at(9, 0)).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn direct_shifts_get_a_host_and_meeting() {
        let db = db_with_hosts();
        let services = services();
        let engine = EngineConfig::default();
        let args = CreateArgs {
            direct: true,
            ..create_args("s1", "2026-03-02T14:00:00Z", "2026-03-02T15:00:00Z")
        };
        create(&mut Vec::new(), &db, &services, &engine, &args, at(9, 0)).unwrap();

        let shift = db.get_shift(&ShiftId::new("s1").unwrap()).unwrap().unwrap();
        assert_eq!(shift.host_id.unwrap().as_str(), "host-a");
        assert!(shift.meeting.unwrap().join_url.starts_with("offline://"));
    }

    #[test]
    fn provisioning_on_a_saturated_pool_fails() {
        let db = db_with_hosts();
        let services = services();
        let engine = EngineConfig::default();
        for id in ["s1", "s2", "s3"] {
            let args = create_args(id, "2026-03-02T14:00:00Z", "2026-03-02T15:00:00Z");
            create(&mut Vec::new(), &db, &services, &engine, &args, at(9, 0)).unwrap();
        }
        provision(&mut Vec::new(), &db, &services, &engine, "s1", at(9, 0)).unwrap();
        provision(&mut Vec::new(), &db, &services, &engine, "s2", at(9, 0)).unwrap();

        let mut buffer = Vec::new();
        let err = provision(&mut buffer, &db, &services, &engine, "s3", at(9, 0)).unwrap_err();
        assert_eq!(err.to_string(), "no host available");
        assert!(output(buffer).starts_with("No host is free for this shift."));
    }

    #[test]
    fn edit_moves_tasks_and_cancel_removes_them() {
        let db = db_with_hosts();
        let services = services();
        let engine = EngineConfig::default();
        let args = create_args("s1", "2026-03-02T14:00:00Z", "2026-03-02T15:00:00Z");
        create(&mut Vec::new(), &db, &services, &engine, &args, at(9, 0)).unwrap();

        let mut buffer = Vec::new();
        edit(
            &mut buffer,
            &db,
            &services,
            &engine,
            &EditArgs {
                id: "s1".to_string(),
                start: "2026-03-02T16:00:00Z".to_string(),
                end: "2026-03-02T17:00:00Z".to_string(),
                actor: organizer(),
            },
            at(9, 0),
        )
        .unwrap();
        cancel(&mut buffer, &db, &services, &engine, "s1", &organizer(), at(9, 5)).unwrap();
        cancel(&mut buffer, &db, &services, &engine, "s1", &organizer(), at(9, 6)).unwrap();

        assert_snapshot!(output(buffer), @r"
        Moved shift s1 to 2026-03-02T16:00:00Z - 2026-03-02T17:00:00Z
        Scheduled task shift-s1-start-1772467200
        Scheduled task shift-s1-end-1772470800
        Cancelled shift s1 (2 pending tasks removed)
        Shift s1 was already cancelled
        ");
        // The tasks for the original times stay queued and are skipped as stale.
        assert_eq!(db.pending_task_count().unwrap(), 2);
    }

    #[test]
    fn editing_a_direct_shift_recreates_its_meeting() {
        let db = db_with_hosts();
        let services = services();
        let engine = EngineConfig::default();
        let args = CreateArgs {
            direct: true,
            ..create_args("s1", "2026-03-02T14:00:00Z", "2026-03-02T15:00:00Z")
        };
        create(&mut Vec::new(), &db, &services, &engine, &args, at(9, 0)).unwrap();
        let id = ShiftId::new("s1").unwrap();
        let before = db.get_shift(&id).unwrap().unwrap().meeting.unwrap();

        let mut buffer = Vec::new();
        edit(
            &mut buffer,
            &db,
            &services,
            &engine,
            &EditArgs {
                id: "s1".to_string(),
                start: "2026-03-02T16:00:00Z".to_string(),
                end: "2026-03-02T17:00:00Z".to_string(),
                actor: organizer(),
            },
            at(9, 0),
        )
        .unwrap();

        let after = db.get_shift(&id).unwrap().unwrap().meeting.unwrap();
        assert_ne!(after.meeting_id, before.meeting_id);
        let text = output(buffer);
        assert!(text.contains("creating a new one"), "{text}");
        assert!(text.contains(&after.join_url), "{text}");
    }

    #[test]
    fn only_the_organizer_may_cancel() {
        let db = db_with_hosts();
        let services = services();
        let engine = EngineConfig::default();
        let args = create_args("s1", "in 5 hours", "in 6 hours");
        create(&mut Vec::new(), &db, &services, &engine, &args, at(9, 0)).unwrap();

        let stranger = ActorArgs {
            user: "p1".to_string(),
            admin: false,
        };
        let err = cancel(
            &mut Vec::new(),
            &db,
            &services,
            &engine,
            "s1",
            &stranger,
            at(9, 5),
        )
        .unwrap_err();
        assert!(err.to_string().contains("only the organizer or an admin"));

        let admin = ActorArgs {
            user: "ops".to_string(),
            admin: true,
        };
        cancel(&mut Vec::new(), &db, &services, &engine, "s1", &admin, at(9, 5)).unwrap();
    }

    #[test]
    fn clock_in_and_out_show_up_on_the_shift() {
        let db = db_with_hosts();
        let services = services();
        let engine = EngineConfig::default();
        let args = create_args("s1", "2026-03-02T14:00:00Z", "2026-03-02T15:00:00Z");
        create(&mut Vec::new(), &db, &services, &engine, &args, at(9, 0)).unwrap();

        let mut buffer = Vec::new();
        clock_in(&mut buffer, &db, &engine, "s1", None, at(14, 5)).unwrap();
        clock_out(
            &mut buffer,
            &db,
            &engine,
            "s1",
            Some("2026-03-02T14:50:00Z"),
            at(15, 0),
        )
        .unwrap();
        show(&mut buffer, &db, "s1", false).unwrap();

        assert_snapshot!(output(buffer), @r#"
        Clocked in to shift s1 at 2026-03-02T14:05:00Z
        Clocked out of shift s1 at 2026-03-02T14:50:00Z (45 min)
        Shift s1
        Status: scheduled
        When: 2026-03-02T14:00:00Z - 2026-03-02T15:00:00Z
        Organizer: Ada (t1)
        Participants: Grace (p1)
        Pay rate: 30.00/h
        Start task: shift-s1-start-1772460000
        End task: shift-s1-end-1772463600
        Timesheet:
        - 2026-03-02T14:05:00Z - 2026-03-02T14:50:00Z manual 0 min 0.00
        "#);
    }

    #[test]
    fn clocking_out_without_clocking_in_fails() {
        let db = db_with_hosts();
        let services = services();
        let engine = EngineConfig::default();
        let args = create_args("s1", "in 5 hours", "in 6 hours");
        create(&mut Vec::new(), &db, &services, &engine, &args, at(9, 0)).unwrap();
        let err = clock_out(&mut Vec::new(), &db, &engine, "s1", None, at(14, 0)).unwrap_err();
        assert!(err.to_string().contains("no open timesheet entry"));
    }

    #[test]
    fn list_filters_by_status() {
        let db = db_with_hosts();
        let services = services();
        let engine = EngineConfig::default();
        for (id, start, end) in [
            ("s1", "2026-03-02T14:00:00Z", "2026-03-02T15:00:00Z"),
            ("s2", "2026-03-02T16:00:00Z", "2026-03-02T17:00:00Z"),
        ] {
            create(&mut Vec::new(), &db, &services, &engine, &create_args(id, start, end), at(9, 0))
                .unwrap();
        }
        cancel(&mut Vec::new(), &db, &services, &engine, "s2", &organizer(), at(9, 5)).unwrap();

        let mut buffer = Vec::new();
        list(&mut buffer, &db, Some(ShiftStatus::Cancelled), false).unwrap();
        assert_snapshot!(output(buffer), @r"
        ID           Start                End                  Status             Meeting
        s2           2026-03-02T16:00:00Z 2026-03-02T17:00:00Z cancelled          -
        ");
    }
}
