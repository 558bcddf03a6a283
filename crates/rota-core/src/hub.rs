//! Hub meetings: many small shifts sharing one provider meeting.
//!
//! # Algorithm Summary
//!
//! 1. Collect unassigned shifts in the look-ahead window
//! 2. Floor each start to a fixed-width bucket aligned to the epoch
//! 3. Resolve contacts, flagging anything that cannot be routed automatically
//! 4. Split each bucket into greedy chunks under the participant cap
//! 5. Join an open hub with room for the chunk, or create a new one
//!
//! Bucketing is a floor, not a sliding window: shifts a minute apart can land
//! in different hubs while shifts far apart inside one bucket share a hub.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::allocation::{AllocationGuard, HostAllocator};
use crate::config::EngineConfig;
use crate::contact::{ContactCheck, check_contact};
use crate::error::Result;
use crate::event::{DomainEvent, publish};
use crate::interval::TimeInterval;
use crate::ports::{BreakoutRoom, MeetingProvider, MeetingRequest, ShiftStore};
use crate::shift::{HubAssignment, MeetingRef, RoutingRisk, Shift};
use crate::types::{HostId, HubId, HubStatus, RoutingMode, ShiftId};

/// A shared meeting for one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubMeeting {
    pub id: HubId,
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
    /// Opens before the bucket by the configured pre-roll.
    pub meeting_start: DateTime<Utc>,
    pub meeting_end: DateTime<Utc>,
    pub status: HubStatus,
    pub host_id: HostId,
    /// `None` until the provider call succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting: Option<MeetingRef>,
    pub shift_ids: Vec<ShiftId>,
    pub participant_count: usize,
    pub capacity: usize,
}

impl HubMeeting {
    pub const fn meeting_window(&self) -> TimeInterval {
        TimeInterval::unchecked(self.meeting_start, self.meeting_end)
    }

    pub const fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.participant_count)
    }

    /// Whether `seats` more participants may join.
    pub const fn can_fit(&self, seats: usize) -> bool {
        self.status.accepts_members() && seats <= self.remaining()
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubSweepReport {
    pub candidates: usize,
    pub buckets: usize,
    pub hubs_created: Vec<HubId>,
    pub hubs_joined: Vec<HubId>,
    pub shifts_assigned: usize,
    /// Shifts left for the next sweep after allocation or provider failures.
    pub shifts_deferred: usize,
    /// Shifts that alone exceed the hub cap.
    pub oversized: Vec<ShiftId>,
    pub routing_risks: usize,
}

/// The shift whose room an identity is routed to.
#[derive(Debug, Clone)]
struct RoutingOwner {
    shift_id: ShiftId,
    interval: TimeInterval,
}

/// A shift with its resolved routing, ready to place in a hub.
#[derive(Debug, Clone)]
struct PlannedShift {
    shift: Shift,
    seats: usize,
    room_name: String,
    preassigned: Vec<String>,
    risks: Vec<RoutingRisk>,
}

impl PlannedShift {
    fn assignment(&self, hub_id: &HubId, routing_mode: RoutingMode) -> (ShiftId, HubAssignment) {
        (
            self.shift.id.clone(),
            HubAssignment {
                hub_id: hub_id.clone(),
                room_name: self.room_name.clone(),
                routing_mode,
                preassigned: self.preassigned.clone(),
                routing_risks: self.risks.clone(),
            },
        )
    }
}

pub struct HubScheduler<'a> {
    store: &'a dyn ShiftStore,
    meetings: &'a dyn MeetingProvider,
    config: &'a EngineConfig,
    allocator: HostAllocator<'a>,
}

impl<'a> HubScheduler<'a> {
    pub fn new(
        store: &'a dyn ShiftStore,
        meetings: &'a dyn MeetingProvider,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            store,
            meetings,
            config,
            allocator: HostAllocator::new(store, config),
        }
    }

    #[must_use]
    pub fn with_guard(mut self, guard: &'a dyn AllocationGuard) -> Self {
        self.allocator = self.allocator.with_guard(guard);
        self
    }

    fn bucket_width(&self) -> Duration {
        Duration::minutes(self.config.hub.bucket_minutes.max(1))
    }

    fn preroll(&self) -> Duration {
        Duration::minutes(self.config.hub.preroll_minutes.max(0))
    }

    /// Assigns every unassigned shift in the look-ahead window to a hub.
    ///
    /// Safe to repeat: assigned shifts are no longer candidates. Chunks fail
    /// independently; only configuration errors abort the sweep.
    pub fn run_sweep(&self, now: DateTime<Utc>) -> Result<HubSweepReport> {
        let hub_cfg = &self.config.hub;
        let window = TimeInterval::unchecked(
            now - Duration::minutes(hub_cfg.lookback_minutes),
            now + Duration::days(hub_cfg.lookahead_days),
        );
        let candidates = self
            .config
            .retry_policy()
            .run("hub_candidates", || self.store.hub_candidates(&window))?;

        let mut report = HubSweepReport {
            candidates: candidates.len(),
            ..HubSweepReport::default()
        };

        let mut buckets: Vec<(DateTime<Utc>, Vec<Shift>)> = Vec::new();
        for shift in candidates {
            let bucket = floor_to_bucket(shift.start, self.bucket_width());
            match buckets.iter_mut().find(|(start, _)| *start == bucket) {
                Some((_, shifts)) => shifts.push(shift),
                None => buckets.push((bucket, vec![shift])),
            }
        }
        report.buckets = buckets.len();

        for (bucket_start, shifts) in buckets {
            let owners = self.existing_owners(bucket_start)?;
            let plans = self.plan_bucket(shifts, owners);
            report.routing_risks += plans.iter().filter(|p| !p.risks.is_empty()).count();

            let (plans, oversized): (Vec<_>, Vec<_>) = plans
                .into_iter()
                .partition(|p| p.seats <= hub_cfg.capacity);
            for plan in oversized {
                tracing::warn!(
                    shift_id = %plan.shift.id,
                    seats = plan.seats,
                    capacity = hub_cfg.capacity,
                    "shift exceeds hub capacity"
                );
                report.oversized.push(plan.shift.id);
            }

            let chunks = chunk_by_capacity(plans, hub_cfg.capacity);
            let split = chunks.len() > 1;
            if split {
                tracing::info!(
                    bucket = %bucket_start,
                    chunks = chunks.len(),
                    "bucket exceeds hub capacity, splitting"
                );
            }
            for (index, chunk) in chunks.into_iter().enumerate() {
                let part = split.then_some(index + 1);
                let shift_count = chunk.len();
                match self.place_chunk(bucket_start, &chunk, part, now) {
                    Ok(Placement::Joined(hub_id)) => {
                        report.shifts_assigned += shift_count;
                        report.hubs_joined.push(hub_id);
                    }
                    Ok(Placement::Created(hub_id)) => {
                        report.shifts_assigned += shift_count;
                        report.hubs_created.push(hub_id);
                    }
                    Err(err) if err.is_configuration() => return Err(err),
                    Err(err) => {
                        tracing::warn!(
                            bucket = %bucket_start,
                            shifts = shift_count,
                            error = %err,
                            "hub chunk left for next sweep"
                        );
                        report.shifts_deferred += shift_count;
                    }
                }
            }
        }

        tracing::info!(
            candidates = report.candidates,
            created = report.hubs_created.len(),
            joined = report.hubs_joined.len(),
            deferred = report.shifts_deferred,
            "hub sweep finished"
        );
        Ok(report)
    }

    /// Identities already routed by members of the bucket's open hubs.
    fn existing_owners(
        &self,
        bucket_start: DateTime<Utc>,
    ) -> Result<HashMap<String, RoutingOwner>> {
        let meeting_start = bucket_start - self.preroll();
        let retry = self.config.retry_policy();
        let hubs = retry.run("open_hubs", || self.store.open_hubs(meeting_start))?;

        let mut owners = HashMap::new();
        for hub in &hubs {
            for shift_id in &hub.shift_ids {
                let member = retry.run("get_shift", || self.store.get_shift(shift_id))?;
                let Some(member) = member else {
                    continue;
                };
                let owner = RoutingOwner {
                    shift_id: member.id.clone(),
                    interval: member.interval(),
                };
                for (user_id, _) in member.identities() {
                    owners
                        .entry(format!("user:{user_id}"))
                        .or_insert_with(|| owner.clone());
                }
                let emails = member.hub.iter().flat_map(|a| a.preassigned.iter());
                for email in emails {
                    owners
                        .entry(format!("email:{}", email.to_lowercase()))
                        .or_insert_with(|| owner.clone());
                }
            }
        }
        Ok(owners)
    }

    /// Resolves routing for every shift in one bucket.
    ///
    /// An identity appearing in several shifts is auto-routed only in the
    /// earliest one (ties by id, which is the candidate order). Members of
    /// hubs already open for the bucket come first.
    fn plan_bucket(
        &self,
        shifts: Vec<Shift>,
        mut owners: HashMap<String, RoutingOwner>,
    ) -> Vec<PlannedShift> {
        let mut plans: Vec<PlannedShift> = Vec::with_capacity(shifts.len());

        for shift in shifts {
            let me = RoutingOwner {
                shift_id: shift.id.clone(),
                interval: shift.interval(),
            };
            let mut preassigned = Vec::new();
            let mut risks = Vec::new();

            for (user_id, role) in shift.identities() {
                let check = match self.store.contact(user_id) {
                    Ok(contact) => check_contact(contact.as_ref()),
                    Err(err) => {
                        tracing::warn!(
                            shift_id = %shift.id,
                            user_id = %user_id,
                            error = %err,
                            "contact lookup failed"
                        );
                        ContactCheck::Risk {
                            reason: "lookup_failed",
                            email: None,
                        }
                    }
                };

                let mut keys = vec![format!("user:{user_id}")];
                if let Some(email) = check.email() {
                    keys.push(format!("email:{}", email.to_lowercase()));
                }
                let earlier = keys
                    .iter()
                    .filter_map(|key| owners.get(key))
                    .find(|owner| owner.shift_id != me.shift_id)
                    .cloned();
                for key in keys {
                    owners.entry(key).or_insert_with(|| me.clone());
                }

                let reason = match (&check, earlier) {
                    (ContactCheck::Risk { reason, .. }, _) => Some(*reason),
                    (ContactCheck::Routable { .. }, Some(owner)) => {
                        let reason = if owner.interval.overlaps(&me.interval) {
                            "overlapping_shift"
                        } else {
                            "duplicate_identity"
                        };
                        tracing::warn!(
                            shift_id = %shift.id,
                            user_id = %user_id,
                            routed_in = %owner.shift_id,
                            reason,
                            "identity appears in more than one shift of a bucket"
                        );
                        Some(reason)
                    }
                    (ContactCheck::Routable { email }, None) => {
                        preassigned.push(email.clone());
                        None
                    }
                };
                if let Some(reason) = reason {
                    risks.push(RoutingRisk {
                        user_id: user_id.clone(),
                        reason: reason.to_string(),
                        role,
                    });
                }
            }

            plans.push(PlannedShift {
                seats: shift.seat_count(),
                room_name: room_name(&shift),
                preassigned,
                risks,
                shift,
            });
        }
        plans
    }

    fn place_chunk(
        &self,
        bucket_start: DateTime<Utc>,
        chunk: &[PlannedShift],
        part: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Placement> {
        let seats: usize = chunk.iter().map(|p| p.seats).sum();
        let meeting_start = bucket_start - self.preroll();
        let meeting_end = bucket_start + self.bucket_width();

        let open = self
            .config
            .retry_policy()
            .run("open_hubs", || self.store.open_hubs(meeting_start))?;
        if let Some(hub) = open.iter().find(|hub| hub.can_fit(seats)) {
            // Breakout rooms of an existing meeting cannot be edited reliably,
            // so late joiners pick their room by name.
            let assignments: Vec<_> = chunk
                .iter()
                .map(|p| p.assignment(&hub.id, RoutingMode::SelfSelect))
                .collect();
            self.store.join_hub(&hub.id, seats, &assignments)?;
            tracing::info!(hub_id = %hub.id, shifts = chunk.len(), seats, "joined existing hub");
            let events: Vec<_> = chunk
                .iter()
                .map(|p| DomainEvent::ShiftJoinedHub {
                    hub_id: hub.id.clone(),
                    shift_id: p.shift.id.clone(),
                    routing_mode: RoutingMode::SelfSelect,
                })
                .collect();
            publish(self.store, &events);
            return Ok(Placement::Joined(hub.id.clone()));
        }

        let first = chunk.first().map_or("empty", |p| p.shift.id.as_str());
        let hub_id = HubId::new(format!("hub-{}-{first}", meeting_start.timestamp()))?;
        let window = TimeInterval::unchecked(meeting_start, meeting_end);
        let shift_ids: Vec<_> = chunk.iter().map(|p| p.shift.id.clone()).collect();

        // Reserve the host before the provider call so concurrent allocations count it.
        let host = self.allocator.reserve(&window, None, |host| {
            self.store.insert_hub(&HubMeeting {
                id: hub_id.clone(),
                bucket_start,
                bucket_end: meeting_end,
                meeting_start,
                meeting_end,
                status: HubStatus::Scheduled,
                host_id: host.id.clone(),
                meeting: None,
                shift_ids: shift_ids.clone(),
                participant_count: seats,
                capacity: self.config.hub.capacity,
            })?;
            Ok(())
        })?;

        let request = MeetingRequest {
            topic: hub_topic(bucket_start, part),
            start: meeting_start,
            duration_minutes: (meeting_end - meeting_start).num_minutes(),
            host: host.id.clone(),
            breakout_rooms: chunk
                .iter()
                .map(|p| BreakoutRoom {
                    name: p.room_name.clone(),
                    participants: p.preassigned.clone(),
                })
                .collect(),
        };
        let meeting = match self.meetings.create_meeting(&request) {
            Ok(meeting) => meeting,
            Err(err) => {
                if let Err(cleanup) = self.store.delete_hub(&hub_id) {
                    tracing::warn!(
                        hub_id = %hub_id,
                        error = %cleanup,
                        "failed to release hub reservation"
                    );
                }
                return Err(err.into());
            }
        };

        let assignments: Vec<_> = chunk
            .iter()
            .map(|p| {
                let mode = if p.risks.is_empty() {
                    RoutingMode::Preassigned
                } else {
                    RoutingMode::Hybrid
                };
                p.assignment(&hub_id, mode)
            })
            .collect();
        self.store.attach_hub_meeting(&hub_id, &meeting, &assignments)?;
        tracing::info!(
            hub_id = %hub_id,
            host = %host.id,
            shifts = chunk.len(),
            seats,
            "created hub"
        );
        publish(
            self.store,
            &[DomainEvent::HubCreated {
                hub_id: hub_id.clone(),
                host_id: host.id.clone(),
                meeting_start,
                shift_ids,
            }],
        );
        self.allocator.touch(&host.id, now);
        Ok(Placement::Created(hub_id))
    }
}

enum Placement {
    Joined(HubId),
    Created(HubId),
}

/// Floors `instant` to the start of its bucket.
pub fn floor_to_bucket(instant: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let width_secs = width.num_seconds().max(1);
    let secs = instant.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(width_secs), 0).unwrap_or(instant)
}

/// Greedy split in discovery order: a new chunk starts whenever the next
/// shift would push the current one over `capacity`.
fn chunk_by_capacity(plans: Vec<PlannedShift>, capacity: usize) -> Vec<Vec<PlannedShift>> {
    let mut chunks = Vec::new();
    let mut current: Vec<PlannedShift> = Vec::new();
    let mut load = 0;
    for plan in plans {
        if !current.is_empty() && load + plan.seats > capacity {
            chunks.push(std::mem::take(&mut current));
            load = 0;
        }
        load += plan.seats;
        current.push(plan);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// `"{organizer} | {participants} | {h:mm AM}"`, with the start in UTC.
pub fn room_name(shift: &Shift) -> String {
    let participants = shift
        .participants_label()
        .unwrap_or_else(|| "Participants".to_string());
    format!(
        "{} | {participants} | {}",
        shift.organizer_label(),
        shift.start.format("%-I:%M %p")
    )
}

fn hub_topic(bucket_start: DateTime<Utc>, part: Option<usize>) -> String {
    let when = bucket_start.format("%b %-d, %-I:%M %p");
    match part {
        Some(part) => format!("Hub {when} (part {part})"),
        None => format!("Hub {when}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;
    use crate::testing::{FakeMeetings, MemoryStore, at, shift};
    use crate::types::UserId;

    fn config(capacity: usize) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.hub.capacity = capacity;
        config
    }

    fn with_participants(mut s: Shift, ids: &[&str]) -> Shift {
        s.participant_ids = ids.iter().map(|id| UserId::new(*id).unwrap()).collect();
        s
    }

    #[test]
    fn buckets_floor_to_even_hours() {
        let width = Duration::minutes(120);
        assert_eq!(floor_to_bucket(at(14, 0), width), at(14, 0));
        assert_eq!(floor_to_bucket(at(15, 59), width), at(14, 0));
        assert_eq!(floor_to_bucket(at(13, 59), width), at(12, 0));
    }

    #[test]
    fn room_names_are_stable_and_readable() {
        let mut s = shift("s1", "t1", at(14, 0), at(15, 0));
        s.organizer_name = Some("Amina".to_string());
        assert_eq!(room_name(&s), "Amina | Participants | 2:00 PM");
        s.participant_names = vec!["Bilal".to_string(), "Sara".to_string()];
        assert_eq!(room_name(&s), "Amina | Bilal, Sara | 2:00 PM");
    }

    #[test]
    fn overflowing_bucket_splits_into_ceil_n_over_cap_hubs() {
        let store = MemoryStore::with_hosts(&[("host-a", 5, 0)]);
        let meetings = FakeMeetings::default();
        let config = config(10);
        for i in 0..13 {
            let mut s = shift(&format!("s{i:02}"), &format!("t{i}"), at(14, 0), at(15, 0));
            s.start += Duration::minutes(i);
            store.add(s);
        }

        let report = HubScheduler::new(&store, &meetings, &config)
            .run_sweep(at(9, 0))
            .unwrap();
        assert_eq!(report.candidates, 13);
        assert_eq!(report.buckets, 1);
        assert_eq!(report.hubs_created.len(), 2);
        assert_eq!(report.shifts_assigned, 13);

        let hubs = store.hubs.borrow();
        let mut members: Vec<_> = hubs.values().flat_map(|h| h.shift_ids.clone()).collect();
        members.sort();
        members.dedup();
        assert_eq!(members.len(), 13);
        assert!(hubs.values().all(|h| h.participant_count <= 10));
        assert_eq!(meetings.created.borrow()[1].topic, "Hub Mar 2, 2:00 PM (part 2)");
    }

    #[test]
    fn late_shift_joins_existing_hub_with_self_select() {
        let store = MemoryStore::with_hosts(&[("host-a", 1, 0)]);
        let meetings = FakeMeetings::default();
        let config = config(100);
        store.add(with_participants(shift("s1", "t1", at(14, 0), at(15, 0)), &["p1"]));
        store.add_contact("t1", Some("t1@example.org"));
        store.add_contact("p1", Some("p1@example.org"));

        let scheduler = HubScheduler::new(&store, &meetings, &config);
        let first = scheduler.run_sweep(at(9, 0)).unwrap();
        assert_eq!(first.hubs_created.len(), 1);
        let hub_id = first.hubs_created[0].clone();
        assert_eq!(store.hub(&hub_id).participant_count, 2);
        let assigned = store.shift("s1").hub.unwrap();
        assert_eq!(assigned.routing_mode, RoutingMode::Preassigned);
        assert_eq!(assigned.preassigned, vec!["t1@example.org", "p1@example.org"]);

        store.add(with_participants(shift("s2", "t2", at(15, 0), at(16, 0)), &["p2", "p3"]));
        let second = scheduler.run_sweep(at(9, 5)).unwrap();
        assert_eq!(second.hubs_joined, vec![hub_id.clone()]);
        assert!(second.hubs_created.is_empty());
        assert_eq!(store.hub(&hub_id).participant_count, 5);
        assert_eq!(store.hub(&hub_id).shift_ids.len(), 2);
        let late = store.shift("s2").hub.unwrap();
        assert_eq!(late.hub_id, hub_id);
        assert_eq!(late.routing_mode, RoutingMode::SelfSelect);
        assert_eq!(meetings.created.borrow().len(), 1);
    }

    #[test]
    fn late_shift_sharing_a_member_identity_is_flagged() {
        let store = MemoryStore::with_hosts(&[("host-a", 1, 0)]);
        let meetings = FakeMeetings::default();
        let config = config(100);
        store.add(with_participants(shift("s1", "t1", at(14, 0), at(14, 45)), &["p1"]));
        for id in ["t1", "t2", "t3", "p1"] {
            store.add_contact(id, Some(&format!("{id}@example.org")));
        }

        let scheduler = HubScheduler::new(&store, &meetings, &config);
        let first = scheduler.run_sweep(at(9, 0)).unwrap();
        let hub_id = first.hubs_created[0].clone();

        store.add(with_participants(shift("s2", "t2", at(14, 30), at(15, 0)), &["p1"]));
        store.add(with_participants(shift("s3", "t3", at(15, 0), at(15, 30)), &["p1"]));
        let second = scheduler.run_sweep(at(9, 5)).unwrap();
        assert_eq!(second.hubs_joined, vec![hub_id]);
        assert_eq!(second.routing_risks, 2);

        let overlapping = store.shift("s2").hub.unwrap();
        assert_eq!(overlapping.preassigned, vec!["t2@example.org"]);
        let reasons: Vec<_> = overlapping
            .routing_risks
            .iter()
            .map(|r| (r.user_id.as_str(), r.reason.as_str()))
            .collect();
        assert_eq!(reasons, vec![("p1", "overlapping_shift")]);

        let later = store.shift("s3").hub.unwrap();
        assert_eq!(later.preassigned, vec!["t3@example.org"]);
        assert_eq!(later.routing_risks[0].reason, "duplicate_identity");

        let original = store.shift("s1").hub.unwrap();
        assert!(original.preassigned.contains(&"p1@example.org".to_string()));
    }

    #[test]
    fn unvalidated_identities_reserve_capacity_but_are_not_preassigned() {
        let store = MemoryStore::with_hosts(&[("host-a", 1, 0)]);
        let meetings = FakeMeetings::default();
        let config = config(100);
        store.add(with_participants(shift("s1", "t1", at(14, 0), at(15, 0)), &["ghost", "p1"]));
        store.add_contact("t1", Some("t1@example.org"));
        store.add_contact("p1", Some("broken"));

        let report = HubScheduler::new(&store, &meetings, &config)
            .run_sweep(at(9, 0))
            .unwrap();
        assert_eq!(report.routing_risks, 1);
        let hub = store.hub(&report.hubs_created[0]);
        assert_eq!(hub.participant_count, 3);

        let assignment = store.shift("s1").hub.unwrap();
        assert_eq!(assignment.routing_mode, RoutingMode::Hybrid);
        assert_eq!(assignment.preassigned, vec!["t1@example.org"]);
        let reasons: Vec<_> = assignment
            .routing_risks
            .iter()
            .map(|r| (r.user_id.as_str(), r.reason.as_str()))
            .collect();
        assert_eq!(reasons, vec![("ghost", "user_not_found"), ("p1", "email_invalid")]);
        let rooms = &meetings.created.borrow()[0].breakout_rooms;
        assert_eq!(rooms[0].participants, vec!["t1@example.org"]);
    }

    #[test]
    fn duplicate_identity_is_routed_only_in_earliest_shift() {
        let store = MemoryStore::with_hosts(&[("host-a", 1, 0)]);
        let meetings = FakeMeetings::default();
        let config = config(100);
        store.add(with_participants(shift("s1", "t1", at(14, 0), at(14, 30)), &["p1"]));
        store.add(with_participants(shift("s2", "t2", at(14, 15), at(15, 0)), &["p1"]));
        store.add(with_participants(shift("s3", "t3", at(15, 0), at(15, 30)), &["p1"]));
        for id in ["t1", "t2", "t3", "p1"] {
            store.add_contact(id, Some(&format!("{id}@example.org")));
        }

        HubScheduler::new(&store, &meetings, &config)
            .run_sweep(at(9, 0))
            .unwrap();

        let first = store.shift("s1").hub.unwrap();
        assert!(first.preassigned.contains(&"p1@example.org".to_string()));
        assert!(!first.has_routing_risk());

        let second = store.shift("s2").hub.unwrap();
        assert_eq!(second.routing_risks[0].reason, "overlapping_shift");
        assert!(!second.preassigned.contains(&"p1@example.org".to_string()));
        assert_eq!(second.routing_mode, RoutingMode::Hybrid);

        let third = store.shift("s3").hub.unwrap();
        assert_eq!(third.routing_risks[0].reason, "duplicate_identity");
    }

    #[test]
    fn shared_email_across_users_is_flagged() {
        let store = MemoryStore::with_hosts(&[("host-a", 1, 0)]);
        let meetings = FakeMeetings::default();
        let config = config(100);
        store.add(shift("s1", "t1", at(14, 0), at(14, 30)));
        store.add(shift("s2", "t2", at(14, 30), at(15, 0)));
        store.add_contact("t1", Some("family@example.org"));
        store.add_contact("t2", Some("Family@example.org"));

        HubScheduler::new(&store, &meetings, &config)
            .run_sweep(at(9, 0))
            .unwrap();
        let second = store.shift("s2").hub.unwrap();
        assert_eq!(second.routing_risks[0].reason, "duplicate_identity");
    }

    #[test]
    fn allocation_failure_leaves_chunk_for_next_sweep() {
        let store = MemoryStore::with_hosts(&[("host-a", 1, 0)]);
        let meetings = FakeMeetings::default();
        let config = config(100);
        let mut busy = shift("direct", "t9", at(13, 0), at(17, 0));
        busy.host_id = Some(HostId::new("host-a").unwrap());
        store.add(busy);
        store.add(shift("s1", "t1", at(14, 0), at(15, 0)));

        let report = HubScheduler::new(&store, &meetings, &config)
            .run_sweep(at(9, 0))
            .unwrap();
        assert_eq!(report.shifts_deferred, 1);
        assert!(store.shift("s1").hub.is_none());
        assert!(store.hubs.borrow().is_empty());
    }

    #[test]
    fn provider_failure_releases_the_reservation() {
        let store = MemoryStore::with_hosts(&[("host-a", 1, 0)]);
        let meetings = FakeMeetings::default();
        meetings.fail.set(true);
        let config = config(100);
        store.add(shift("s1", "t1", at(14, 0), at(15, 0)));

        let report = HubScheduler::new(&store, &meetings, &config)
            .run_sweep(at(9, 0))
            .unwrap();
        assert_eq!(report.shifts_deferred, 1);
        assert!(store.hubs.borrow().is_empty());
        assert!(store.shift("s1").hub.is_none());
    }

    #[test]
    fn missing_hosts_abort_the_sweep() {
        let store = MemoryStore::default();
        let meetings = FakeMeetings::default();
        let config = config(100);
        store.add(shift("s1", "t1", at(14, 0), at(15, 0)));

        let err = HubScheduler::new(&store, &meetings, &config)
            .run_sweep(at(9, 0))
            .unwrap_err();
        assert!(matches!(err, Error::NoHostsConfigured));
    }

    #[test]
    fn oversized_shift_is_reported_not_placed() {
        let store = MemoryStore::with_hosts(&[("host-a", 1, 0)]);
        let meetings = FakeMeetings::default();
        let config = config(2);
        store.add(with_participants(shift("big", "t1", at(14, 0), at(15, 0)), &["a", "b"]));

        let report = HubScheduler::new(&store, &meetings, &config)
            .run_sweep(at(9, 0))
            .unwrap();
        assert_eq!(report.oversized, vec![ShiftId::new("big").unwrap()]);
        assert!(report.hubs_created.is_empty());
    }

    #[test]
    fn hub_booking_counts_against_host_capacity() {
        let store = MemoryStore::with_hosts(&[("host-a", 1, 0), ("host-b", 1, 1)]);
        let meetings = FakeMeetings::default();
        let config = config(100);
        store.add(shift("s1", "t1", at(14, 0), at(15, 0)));
        HubScheduler::new(&store, &meetings, &config)
            .run_sweep(at(9, 0))
            .unwrap();

        let interval = TimeInterval::new(at(13, 50), at(14, 10)).unwrap();
        let host = HostAllocator::new(&store, &config)
            .find_available_host(&interval, None)
            .unwrap();
        assert_eq!(host.id.as_str(), "host-b");
    }

    #[test]
    fn failed_contact_lookup_is_flagged_not_fatal() {
        let store = MemoryStore::with_hosts(&[("host-a", 1, 0)]);
        let meetings = FakeMeetings::default();
        let config = config(100);
        store.add(shift("s1", "t1", at(14, 0), at(15, 0)));
        store.broken_contacts.borrow_mut().push("t1".to_string());

        let report = HubScheduler::new(&store, &meetings, &config)
            .run_sweep(at(9, 0))
            .unwrap();
        assert_eq!(report.shifts_assigned, 1);
        let assignment = store.shift("s1").hub.unwrap();
        assert_eq!(assignment.routing_mode, RoutingMode::Hybrid);
        assert_eq!(assignment.routing_risks[0].reason, "lookup_failed");
    }
}
