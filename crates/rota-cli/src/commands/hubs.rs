//! Shared hub meetings: the bucketing sweep and live moderation.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rota_core::{EngineConfig, HubId, HubMeeting, HubScheduler, MeetingRef};
use rota_db::Database;

use super::util::{format_time, write_json};
use crate::adapters::Services;

pub fn sweep<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    engine: &EngineConfig,
    now: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let report = HubScheduler::new(db, services.meetings(), engine)
        .run_sweep(now)
        .context("hub sweep failed")?;
    if json {
        return write_json(writer, &report);
    }

    writeln!(writer, "Hub sweep at {}", format_time(now))?;
    writeln!(
        writer,
        "Candidates: {} in {} buckets",
        report.candidates, report.buckets
    )?;
    writeln!(writer, "Hubs created: {}", join_ids(&report.hubs_created))?;
    writeln!(writer, "Hubs joined: {}", join_ids(&report.hubs_joined))?;
    writeln!(
        writer,
        "Shifts assigned: {} ({} deferred to the next sweep)",
        report.shifts_assigned, report.shifts_deferred
    )?;
    if report.routing_risks > 0 {
        writeln!(writer, "Participants without a routable email: {}", report.routing_risks)?;
    }
    if !report.oversized.is_empty() {
        writeln!(
            writer,
            "Too large for any hub: {}",
            join_ids(&report.oversized)
        )?;
    }
    Ok(())
}

fn join_ids<T: std::fmt::Display>(ids: &[T]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Hubs whose meeting has not ended yet.
pub fn list<W: Write>(writer: &mut W, db: &Database, now: DateTime<Utc>, json: bool) -> Result<()> {
    let hubs = db.list_hubs(now)?;
    if json {
        return write_json(writer, &hubs);
    }
    if hubs.is_empty() {
        writeln!(writer, "No upcoming hub meetings.")?;
        return Ok(());
    }
    for hub in &hubs {
        writeln!(
            writer,
            "{} {} - {} {} host {} seats {}/{} shifts {}",
            hub.id,
            format_time(hub.meeting_start),
            format_time(hub.meeting_end),
            hub.status,
            hub.host_id,
            hub.participant_count,
            hub.capacity,
            hub.shift_ids.len(),
        )?;
    }
    Ok(())
}

fn hub_meeting(db: &Database, hub_id: &str) -> Result<(HubMeeting, MeetingRef)> {
    let id = HubId::new(hub_id)?;
    let hub = db
        .get_hub(&id)?
        .with_context(|| format!("hub not found: {id}"))?;
    let meeting = hub
        .meeting
        .clone()
        .with_context(|| format!("hub {id} has no provider meeting yet"))?;
    Ok((hub, meeting))
}

pub fn participants<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    hub_id: &str,
    json: bool,
) -> Result<()> {
    let (hub, meeting) = hub_meeting(db, hub_id)?;
    let live = services
        .meetings()
        .list_participants(&meeting.meeting_id)
        .with_context(|| format!("failed to list participants of hub {}", hub.id))?;
    if json {
        return write_json(writer, &live);
    }
    writeln!(writer, "{} participants in hub {}", live.len(), hub.id)?;
    for participant in &live {
        writeln!(
            writer,
            "- {} {} {}",
            participant.id,
            participant.name,
            participant.email.as_deref().unwrap_or("-")
        )?;
    }
    Ok(())
}

/// Moderation actions on a live hub participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Moderation {
    Mute,
    Remove,
}

pub fn moderate<W: Write>(
    writer: &mut W,
    db: &Database,
    services: &Services,
    hub_id: &str,
    participant_id: &str,
    action: Moderation,
) -> Result<()> {
    let (hub, meeting) = hub_meeting(db, hub_id)?;
    let meetings = services.meetings();
    match action {
        Moderation::Mute => {
            meetings.mute_participant(&meeting.meeting_id, participant_id)?;
            writeln!(writer, "Muted {participant_id} in hub {}", hub.id)?;
        }
        Moderation::Remove => {
            meetings.remove_participant(&meeting.meeting_id, participant_id)?;
            writeln!(writer, "Removed {participant_id} from hub {}", hub.id)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;
    use rota_core::{Shift, ShiftId, ShiftStore, UserId};

    use crate::Config;
    use crate::commands::testing::{at, db_with_hosts, output};

    fn add_shift(db: &Database, id: &str, participant: &str) {
        let shift = Shift::new(
            ShiftId::new(id).unwrap(),
            UserId::new("t1").unwrap(),
            vec![UserId::new(participant).unwrap()],
            at(14, 0),
            at(15, 0),
            30.0,
        );
        db.insert_shift(&shift).unwrap();
    }

    #[test]
    fn sweep_groups_shifts_into_one_hub() {
        let db = db_with_hosts();
        let services = Services::from_config(&Config::default()).unwrap();
        let engine = EngineConfig::default();
        add_shift(&db, "s1", "p1");
        add_shift(&db, "s2", "p2");

        let mut buffer = Vec::new();
        sweep(&mut buffer, &db, &services, &engine, at(9, 0), true).unwrap();
        let report: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(report["candidates"], 2);
        assert_eq!(report["hubs_created"].as_array().unwrap().len(), 1);
        assert_eq!(report["shifts_assigned"], 2);

        let hubs = db.list_hubs(at(9, 0)).unwrap();
        assert_eq!(hubs.len(), 1);
        assert_eq!(hubs[0].participant_count, 4);
        assert!(hubs[0].meeting.is_some());

        // A second sweep finds nothing left to place.
        let mut buffer = Vec::new();
        sweep(&mut buffer, &db, &services, &engine, at(9, 5), false).unwrap();
        assert_snapshot!(output(buffer), @r"
        Hub sweep at 2026-03-02T09:05:00Z
        Candidates: 0 in 0 buckets
        Hubs created: none
        Hubs joined: none
        Shifts assigned: 0 (0 deferred to the next sweep)
        ");
    }

    #[test]
    fn offline_hubs_list_no_participants_and_refuse_moderation() {
        let db = db_with_hosts();
        let services = Services::from_config(&Config::default()).unwrap();
        let engine = EngineConfig::default();
        add_shift(&db, "s1", "p1");
        sweep(&mut Vec::new(), &db, &services, &engine, at(9, 0), false).unwrap();
        let hub_id = db.list_hubs(at(9, 0)).unwrap()[0].id.to_string();

        let mut buffer = Vec::new();
        participants(&mut buffer, &db, &services, &hub_id, false).unwrap();
        assert_eq!(output(buffer), format!("0 participants in hub {hub_id}\n"));

        let err = moderate(&mut Vec::new(), &db, &services, &hub_id, "p1", Moderation::Mute)
            .unwrap_err();
        assert!(err.to_string().contains("no meeting provider is configured"));
    }

    #[test]
    fn unknown_hub_is_an_error() {
        let db = db_with_hosts();
        let services = Services::from_config(&Config::default()).unwrap();
        let err = participants(&mut Vec::new(), &db, &services, "hub-x", false).unwrap_err();
        assert_eq!(err.to_string(), "hub not found: hub-x");
    }
}
