//! Shifts and their timesheet entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::TimeInterval;
use crate::types::{CompletionMethod, HostId, HubId, RoutingMode, ShiftId, ShiftStatus, UserId};

/// Reference to a meeting created at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRef {
    pub meeting_id: String,
    pub join_url: String,
}

/// Why an identity could not be pre-assigned to its sub-room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRisk {
    pub user_id: UserId,
    pub reason: String,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Organizer,
    Participant,
}

/// Where a shift sits inside a hub meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubAssignment {
    pub hub_id: HubId,
    pub room_name: String,
    pub routing_mode: RoutingMode,
    /// Emails handed to the provider for automatic routing.
    #[serde(default)]
    pub preassigned: Vec<String>,
    #[serde(default)]
    pub routing_risks: Vec<RoutingRisk>,
}

impl HubAssignment {
    pub fn has_routing_risk(&self) -> bool {
        !self.routing_risks.is_empty()
    }
}

/// A scheduled session with one organizer and any number of participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub id: ShiftId,
    pub organizer_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer_name: Option<String>,
    #[serde(default)]
    pub participant_ids: Vec<UserId>,
    #[serde(default)]
    pub participant_names: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: ShiftStatus,
    /// Hourly pay rate.
    #[serde(default)]
    pub pay_rate: f64,
    /// Host booked for a direct (non-hub) meeting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<HostId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting: Option<MeetingRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubAssignment>,
    /// Names of the most recently scheduled lifecycle tasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_task: Option<String>,
    /// Clock evidence recorded on the shift itself rather than a timesheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_in_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_out_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worked_minutes: Option<i64>,
    #[serde(default)]
    pub auto_clock_out: bool,
}

impl Shift {
    /// Creates a scheduled shift with no assignments.
    pub fn new(
        id: ShiftId,
        organizer_id: UserId,
        participant_ids: Vec<UserId>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        pay_rate: f64,
    ) -> Self {
        let mut unique = Vec::with_capacity(participant_ids.len());
        for participant in participant_ids {
            if participant != organizer_id && !unique.contains(&participant) {
                unique.push(participant);
            }
        }
        Self {
            id,
            organizer_id,
            organizer_name: None,
            participant_ids: unique,
            participant_names: Vec::new(),
            start,
            end,
            status: ShiftStatus::Scheduled,
            pay_rate,
            host_id: None,
            meeting: None,
            hub: None,
            start_task: None,
            end_task: None,
            clock_in_at: None,
            clock_out_at: None,
            worked_minutes: None,
            auto_clock_out: false,
        }
    }

    /// The scheduled window. Stored shifts always satisfy `end > start`.
    pub const fn interval(&self) -> TimeInterval {
        TimeInterval::unchecked(self.start, self.end)
    }

    /// Organizer followed by participants.
    pub fn identities(&self) -> impl Iterator<Item = (&UserId, ParticipantRole)> {
        std::iter::once((&self.organizer_id, ParticipantRole::Organizer)).chain(
            self.participant_ids
                .iter()
                .map(|id| (id, ParticipantRole::Participant)),
        )
    }

    /// Seats this shift occupies in a hub: the organizer plus every participant.
    pub fn seat_count(&self) -> usize {
        1 + self.participant_ids.len()
    }

    pub fn is_organizer(&self, user: &UserId) -> bool {
        &self.organizer_id == user
    }

    /// Display name of the organizer, falling back to the id.
    pub fn organizer_label(&self) -> &str {
        self.organizer_name
            .as_deref()
            .unwrap_or_else(|| self.organizer_id.as_str())
    }

    /// Comma-separated participant names, or `None` when there are none.
    pub fn participants_label(&self) -> Option<String> {
        if self.participant_names.is_empty() {
            None
        } else {
            Some(self.participant_names.join(", "))
        }
    }
}

/// A clock-in/out record for one shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimesheetEntry {
    pub id: String,
    pub shift_id: ShiftId,
    pub clock_in: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_out: Option<DateTime<Utc>>,
    /// Overrides the shift's pay rate when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<f64>,
    #[serde(default)]
    pub worked_minutes: i64,
    #[serde(default)]
    pub pay: f64,
    pub completion_method: CompletionMethod,
}

impl TimesheetEntry {
    /// Opens a manual entry.
    pub const fn open(id: String, shift_id: ShiftId, clock_in: DateTime<Utc>) -> Self {
        Self {
            id,
            shift_id,
            clock_in,
            clock_out: None,
            hourly_rate: None,
            worked_minutes: 0,
            pay: 0.0,
            completion_method: CompletionMethod::Manual,
        }
    }
}
