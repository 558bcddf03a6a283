//! In-memory collaborators for engine tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeZone, Utc};

use crate::contact::Contact;
use crate::event::DomainEvent;
use crate::host::Host;
use crate::hub::HubMeeting;
use crate::interval::TimeInterval;
use crate::ports::{
    DeleteOutcome, LiveParticipant, MeetingError, MeetingProvider, MeetingRequest, QueueError,
    ScheduleOutcome, ShiftStore, StoreError, TaskQueue, TaskRequest,
};
use crate::reconcile::Reconciliation;
use crate::shift::{HubAssignment, MeetingRef, Shift, TimesheetEntry};
use crate::types::{HostId, HubId, ShiftId, ShiftStatus, UserId};

/// 2026-03-02 (a Monday) at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0)
        .single()
        .expect("valid test timestamp")
}

pub fn shift(id: &str, organizer: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Shift {
    Shift::new(
        ShiftId::new(id).unwrap(),
        UserId::new(organizer).unwrap(),
        Vec::new(),
        start,
        end,
        60.0,
    )
}

fn missing(kind: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{kind} {id} not found").into())
}

#[derive(Default)]
pub struct MemoryStore {
    pub shifts: RefCell<BTreeMap<ShiftId, Shift>>,
    pub hosts: RefCell<Vec<Host>>,
    pub hubs: RefCell<BTreeMap<HubId, HubMeeting>>,
    pub contacts: RefCell<HashMap<UserId, Contact>>,
    pub entries: RefCell<Vec<TimesheetEntry>>,
    pub events: RefCell<Vec<DomainEvent>>,
    /// Contact lookups for these users fail.
    pub broken_contacts: RefCell<Vec<String>>,
    /// The next N `active_hosts` calls fail transiently.
    pub transient_failures: Cell<u32>,
}

impl MemoryStore {
    /// Hosts as `(id, max_concurrent, priority)`.
    pub fn with_hosts(hosts: &[(&str, u32, i32)]) -> Self {
        let store = Self::default();
        *store.hosts.borrow_mut() = hosts
            .iter()
            .map(|(id, cap, priority)| Host::new(HostId::new(*id).unwrap(), *cap, *priority))
            .collect();
        store
    }

    pub fn add(&self, shift: Shift) -> Shift {
        self.shifts
            .borrow_mut()
            .insert(shift.id.clone(), shift.clone());
        shift
    }

    pub fn shift(&self, id: &str) -> Shift {
        self.shifts.borrow()[&ShiftId::new(id).unwrap()].clone()
    }

    pub fn hub(&self, id: &HubId) -> HubMeeting {
        self.hubs.borrow()[id].clone()
    }

    pub fn add_contact(&self, id: &str, email: Option<&str>) {
        let user_id = UserId::new(id).unwrap();
        self.contacts.borrow_mut().insert(
            user_id.clone(),
            Contact {
                user_id,
                email: email.map(String::from),
                email_verified: true,
                display_name: None,
            },
        );
    }

    fn with_shift<T>(
        &self,
        id: &ShiftId,
        f: impl FnOnce(&mut Shift) -> T,
    ) -> Result<T, StoreError> {
        let mut shifts = self.shifts.borrow_mut();
        let shift = shifts.get_mut(id).ok_or_else(|| missing("shift", id))?;
        Ok(f(shift))
    }
}

fn committed(shift: &Shift) -> bool {
    ShiftStatus::COMMITTED.contains(&shift.status)
}

fn inside(window: &TimeInterval, instant: DateTime<Utc>) -> bool {
    window.start <= instant && instant <= window.end
}

impl ShiftStore for MemoryStore {
    fn get_shift(&self, id: &ShiftId) -> Result<Option<Shift>, StoreError> {
        Ok(self.shifts.borrow().get(id).cloned())
    }

    fn insert_shift(&self, shift: &Shift) -> Result<(), StoreError> {
        self.add(shift.clone());
        Ok(())
    }

    fn update_shift_times(
        &self,
        id: &ShiftId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        clear_meeting: bool,
    ) -> Result<(), StoreError> {
        self.with_shift(id, |s| {
            s.start = start;
            s.end = end;
            if clear_meeting {
                s.meeting = None;
            }
        })
    }

    fn transition_status(
        &self,
        id: &ShiftId,
        from: &[ShiftStatus],
        to: ShiftStatus,
    ) -> Result<bool, StoreError> {
        self.with_shift(id, |s| {
            let allowed = from.contains(&s.status);
            if allowed {
                s.status = to;
            }
            allowed
        })
    }

    fn set_host(&self, id: &ShiftId, host: Option<&HostId>) -> Result<(), StoreError> {
        self.with_shift(id, |s| s.host_id = host.cloned())
    }

    fn set_meeting(&self, id: &ShiftId, meeting: &MeetingRef) -> Result<(), StoreError> {
        self.with_shift(id, |s| s.meeting = Some(meeting.clone()))
    }

    fn set_task_names(
        &self,
        id: &ShiftId,
        start_task: Option<&str>,
        end_task: Option<&str>,
    ) -> Result<(), StoreError> {
        self.with_shift(id, |s| {
            if let Some(name) = start_task {
                s.start_task = Some(name.to_string());
            }
            if let Some(name) = end_task {
                s.end_task = Some(name.to_string());
            }
        })
    }

    fn clear_hub_assignment(&self, id: &ShiftId) -> Result<(), StoreError> {
        self.with_shift(id, |s| s.hub = None)
    }

    fn hub_candidates(&self, window: &TimeInterval) -> Result<Vec<Shift>, StoreError> {
        let mut found: Vec<_> = self
            .shifts
            .borrow()
            .values()
            .filter(|s| {
                committed(s) && s.hub.is_none() && s.host_id.is_none() && inside(window, s.start)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    fn shifts_with_boundary_in(&self, window: &TimeInterval) -> Result<Vec<Shift>, StoreError> {
        Ok(self
            .shifts
            .borrow()
            .values()
            .filter(|s| committed(s) && (inside(window, s.start) || inside(window, s.end)))
            .cloned()
            .collect())
    }

    fn overdue_shifts(&self, cutoff: DateTime<Utc>) -> Result<Vec<Shift>, StoreError> {
        Ok(self
            .shifts
            .borrow()
            .values()
            .filter(|s| committed(s) && s.end <= cutoff)
            .cloned()
            .collect())
    }

    fn committed_intervals(
        &self,
        host: &HostId,
        window: &TimeInterval,
        exclude: Option<&ShiftId>,
    ) -> Result<Vec<TimeInterval>, StoreError> {
        let mut booked: Vec<_> = self
            .shifts
            .borrow()
            .values()
            .filter(|s| {
                committed(s)
                    && s.host_id.as_ref() == Some(host)
                    && exclude != Some(&s.id)
                    && s.interval().overlaps(window)
            })
            .map(Shift::interval)
            .collect();
        booked.extend(
            self.hubs
                .borrow()
                .values()
                .filter(|h| {
                    h.status.accepts_members()
                        && &h.host_id == host
                        && h.meeting_window().overlaps(window)
                })
                .map(HubMeeting::meeting_window),
        );
        Ok(booked)
    }

    fn active_hosts(&self) -> Result<Vec<Host>, StoreError> {
        let pending = self.transient_failures.get();
        if pending > 0 {
            self.transient_failures.set(pending - 1);
            return Err(StoreError::Transient("database is locked".into()));
        }
        Ok(self
            .hosts
            .borrow()
            .iter()
            .filter(|h| h.active)
            .cloned()
            .collect())
    }

    fn touch_host(&self, id: &HostId, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(host) = self.hosts.borrow_mut().iter_mut().find(|h| &h.id == id) {
            host.last_used_at = Some(at);
        }
        Ok(())
    }

    fn contact(&self, id: &UserId) -> Result<Option<Contact>, StoreError> {
        if self
            .broken_contacts
            .borrow()
            .iter()
            .any(|broken| broken == id.as_str())
        {
            return Err(StoreError::Backend("users unavailable".into()));
        }
        Ok(self.contacts.borrow().get(id).cloned())
    }

    fn open_hubs(&self, meeting_start: DateTime<Utc>) -> Result<Vec<HubMeeting>, StoreError> {
        Ok(self
            .hubs
            .borrow()
            .values()
            .filter(|h| h.meeting_start == meeting_start && h.status.accepts_members())
            .cloned()
            .collect())
    }

    fn insert_hub(&self, hub: &HubMeeting) -> Result<(), StoreError> {
        let mut hubs = self.hubs.borrow_mut();
        if hubs.contains_key(&hub.id) {
            return Err(StoreError::Backend(format!("hub {} exists", hub.id).into()));
        }
        hubs.insert(hub.id.clone(), hub.clone());
        Ok(())
    }

    fn delete_hub(&self, id: &HubId) -> Result<(), StoreError> {
        self.hubs.borrow_mut().remove(id);
        Ok(())
    }

    fn attach_hub_meeting(
        &self,
        id: &HubId,
        meeting: &MeetingRef,
        assignments: &[(ShiftId, HubAssignment)],
    ) -> Result<(), StoreError> {
        {
            let mut hubs = self.hubs.borrow_mut();
            let hub = hubs.get_mut(id).ok_or_else(|| missing("hub", id))?;
            hub.meeting = Some(meeting.clone());
        }
        for (shift_id, assignment) in assignments {
            self.with_shift(shift_id, |s| s.hub = Some(assignment.clone()))?;
        }
        Ok(())
    }

    fn join_hub(
        &self,
        id: &HubId,
        seats: usize,
        assignments: &[(ShiftId, HubAssignment)],
    ) -> Result<(), StoreError> {
        {
            let mut hubs = self.hubs.borrow_mut();
            let hub = hubs.get_mut(id).ok_or_else(|| missing("hub", id))?;
            hub.participant_count += seats;
            hub.shift_ids
                .extend(assignments.iter().map(|(shift_id, _)| shift_id.clone()));
        }
        for (shift_id, assignment) in assignments {
            self.with_shift(shift_id, |s| s.hub = Some(assignment.clone()))?;
        }
        Ok(())
    }

    fn timesheet_entries(&self, shift: &ShiftId) -> Result<Vec<TimesheetEntry>, StoreError> {
        Ok(self
            .entries
            .borrow()
            .iter()
            .filter(|e| &e.shift_id == shift)
            .cloned()
            .collect())
    }

    fn insert_timesheet_entry(&self, entry: &TimesheetEntry) -> Result<(), StoreError> {
        self.entries.borrow_mut().push(entry.clone());
        Ok(())
    }

    fn close_timesheet_entry(&self, id: &str, clock_out: DateTime<Utc>) -> Result<(), StoreError> {
        let mut entries = self.entries.borrow_mut();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| missing("entry", id))?;
        entry.clock_out = Some(clock_out);
        Ok(())
    }

    fn apply_reconciliation(
        &self,
        shift: &ShiftId,
        reconciliation: &Reconciliation,
        status: Option<ShiftStatus>,
    ) -> Result<(), StoreError> {
        {
            let mut entries = self.entries.borrow_mut();
            for updated in &reconciliation.entries {
                if let Some(entry) = entries.iter_mut().find(|e| e.id == updated.id) {
                    *entry = updated.clone();
                }
            }
        }
        self.with_shift(shift, |s| {
            s.worked_minutes = Some(reconciliation.worked_minutes);
            s.auto_clock_out = reconciliation.auto_clock_out;
            match status {
                Some(status) if s.status != ShiftStatus::Cancelled => s.status = status,
                _ => {}
            }
        })
    }

    fn append_events(&self, events: &[DomainEvent]) -> Result<(), StoreError> {
        self.events.borrow_mut().extend_from_slice(events);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeQueue {
    pub tasks: RefCell<BTreeMap<String, TaskRequest>>,
    pub misconfigured: Cell<bool>,
    /// Deletes fail as if the queue were down.
    pub unreachable: Cell<bool>,
}

impl TaskQueue for FakeQueue {
    fn schedule(&self, task: &TaskRequest) -> Result<ScheduleOutcome, QueueError> {
        if self.misconfigured.get() {
            return Err(QueueError::Misconfigured("no queue configured".to_string()));
        }
        let mut tasks = self.tasks.borrow_mut();
        if tasks.contains_key(&task.name) {
            return Ok(ScheduleOutcome::AlreadyExists);
        }
        tasks.insert(task.name.clone(), task.clone());
        Ok(ScheduleOutcome::Created)
    }

    fn delete(&self, name: &str) -> Result<DeleteOutcome, QueueError> {
        if self.unreachable.get() {
            return Err(QueueError::Transport("connection refused".to_string()));
        }
        Ok(match self.tasks.borrow_mut().remove(name) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }
}

#[derive(Default)]
pub struct FakeMeetings {
    pub created: RefCell<Vec<MeetingRequest>>,
    pub fail: Cell<bool>,
}

impl MeetingProvider for FakeMeetings {
    fn create_meeting(&self, request: &MeetingRequest) -> Result<MeetingRef, MeetingError> {
        if self.fail.get() {
            return Err(MeetingError::Rejected {
                status: 400,
                message: "invalid host".to_string(),
            });
        }
        let mut created = self.created.borrow_mut();
        created.push(request.clone());
        let id = created.len();
        Ok(MeetingRef {
            meeting_id: format!("m{id}"),
            join_url: format!("https://meet.example/j/m{id}"),
        })
    }

    fn list_participants(&self, _meeting_id: &str) -> Result<Vec<LiveParticipant>, MeetingError> {
        Ok(Vec::new())
    }

    fn mute_participant(
        &self,
        _meeting_id: &str,
        _participant_id: &str,
    ) -> Result<(), MeetingError> {
        Ok(())
    }

    fn remove_participant(
        &self,
        _meeting_id: &str,
        _participant_id: &str,
    ) -> Result<(), MeetingError> {
        Ok(())
    }
}
