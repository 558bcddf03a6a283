//! Engine errors.

use thiserror::Error;

use crate::interval::TimeInterval;
use crate::ports::{MeetingError, QueueError, StoreError};
use crate::types::{HubId, ShiftId, ShiftStatus, ValidationError};

/// Errors returned by the engines.
#[derive(Debug, Error)]
pub enum Error {
    /// The host pool is empty. Needs admin configuration.
    #[error("no meeting hosts are configured")]
    NoHostsConfigured,

    /// Every host is saturated for the requested interval.
    #[error("no host has capacity for the requested interval ({} alternatives found)", alternatives.len())]
    NoAvailableHost { alternatives: Vec<TimeInterval> },

    #[error("shift not found: {0}")]
    ShiftNotFound(ShiftId),

    #[error("shift end must be after its start")]
    InvalidInterval,

    #[error("only the organizer or an admin may change shift {0}")]
    Forbidden(ShiftId),

    #[error("shift {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ShiftId,
        from: ShiftStatus,
        to: ShiftStatus,
    },

    #[error("shift {id} is {status} and can no longer change")]
    ShiftClosed { id: ShiftId, status: ShiftStatus },

    #[error("no open timesheet entry for shift {0}")]
    NotClockedIn(ShiftId),

    #[error("shift {id} already meets in hub {hub_id}")]
    InHub { id: ShiftId, hub_id: HubId },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Meeting(#[from] MeetingError),
}

impl Error {
    /// Whether an administrator has to fix configuration before retrying.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoHostsConfigured
                | Self::Queue(QueueError::Misconfigured(_))
                | Self::Meeting(MeetingError::Misconfigured(_))
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
