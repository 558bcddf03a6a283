//! Domain events emitted by the engines.
//!
//! Engines never send email, push notifications or provider patches inline.
//! They append events to the store's outbox and a separate dispatcher
//! delivers them, so delivery can be retried independently of the state
//! change that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::ShiftStore;
use crate::types::{HostId, HubId, RoutingMode, ShiftId, ShiftStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    ShiftActivated {
        shift_id: ShiftId,
        at: DateTime<Utc>,
    },
    ShiftReconciled {
        shift_id: ShiftId,
        status: ShiftStatus,
        worked_minutes: i64,
        scheduled_minutes: i64,
        auto_clock_out: bool,
    },
    ShiftMissed {
        shift_id: ShiftId,
        organizer_id: String,
    },
    ShiftCancelled {
        shift_id: ShiftId,
        at: DateTime<Utc>,
    },
    HostAssigned {
        shift_id: ShiftId,
        host_id: HostId,
    },
    HubCreated {
        hub_id: HubId,
        host_id: HostId,
        meeting_start: DateTime<Utc>,
        shift_ids: Vec<ShiftId>,
    },
    ShiftJoinedHub {
        hub_id: HubId,
        shift_id: ShiftId,
        routing_mode: RoutingMode,
    },
    MeetingProvisionFailed {
        shift_id: ShiftId,
        error: String,
    },
}

impl DomainEvent {
    /// Short name used for logging and the outbox `kind` column.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ShiftActivated { .. } => "shift_activated",
            Self::ShiftReconciled { .. } => "shift_reconciled",
            Self::ShiftMissed { .. } => "shift_missed",
            Self::ShiftCancelled { .. } => "shift_cancelled",
            Self::HostAssigned { .. } => "host_assigned",
            Self::HubCreated { .. } => "hub_created",
            Self::ShiftJoinedHub { .. } => "shift_joined_hub",
            Self::MeetingProvisionFailed { .. } => "meeting_provision_failed",
        }
    }
}

/// Appends events to the outbox. Failures are logged, never propagated.
pub(crate) fn publish(store: &dyn ShiftStore, events: &[DomainEvent]) {
    if events.is_empty() {
        return;
    }
    if let Err(err) = store.append_events(events) {
        let kinds: Vec<_> = events.iter().map(DomainEvent::kind).collect();
        tracing::warn!(error = %err, ?kinds, "failed to append events to outbox");
    }
}
