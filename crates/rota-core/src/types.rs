//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Unknown shift status string.
    #[error("invalid shift status: {value}")]
    InvalidShiftStatus { value: String },

    /// Unknown hub status string.
    #[error("invalid hub status: {value}")]
    InvalidHubStatus { value: String },

    /// Unknown routing mode string.
    #[error("invalid routing mode: {value}")]
    InvalidRoutingMode { value: String },

    /// Unknown completion method string.
    #[error("invalid completion method: {value}")]
    InvalidCompletionMethod { value: String },

    /// Unknown task phase string.
    #[error("invalid task phase: {value}")]
    InvalidTaskPhase { value: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated shift identifier.
    ShiftId, "shift ID"
);

define_string_id!(
    /// A validated user identifier (organizer or participant).
    UserId, "user ID"
);

define_string_id!(
    /// A meeting host identity, e.g. the account handle used with the provider.
    HostId, "host ID"
);

define_string_id!(
    /// A validated hub meeting identifier.
    HubId, "hub ID"
);

/// Generates a string-backed enum with `as_str`, `Display`, `FromStr` and serde support.
macro_rules! define_str_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $error:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// String representation for storage and wire payloads.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    _ => Err(ValidationError::$error { value: s.to_string() }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for &'static str {
            fn from(value: $name) -> Self {
                value.as_str()
            }
        }
    };
}

define_str_enum!(
    /// Lifecycle status of a shift.
    ShiftStatus, InvalidShiftStatus {
        /// Created, waiting for its start task.
        Scheduled => "scheduled",
        /// Start task fired; the session is in progress.
        Active => "active",
        /// Worked time covered the scheduled duration.
        FullyCompleted => "fullyCompleted",
        /// Some work was recorded, but less than scheduled.
        PartiallyCompleted => "partiallyCompleted",
        /// Nobody clocked in.
        Missed => "missed",
        /// Cancelled by the organizer or an admin. Absorbing.
        Cancelled => "cancelled",
    }
);

impl ShiftStatus {
    /// Statuses that still hold a host or hub booking.
    pub const COMMITTED: [Self; 2] = [Self::Scheduled, Self::Active];

    /// Whether the shift has left the scheduled/active part of its lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::FullyCompleted | Self::PartiallyCompleted | Self::Missed | Self::Cancelled
        )
    }
}

define_str_enum!(
    /// Status of a shared hub meeting.
    HubStatus, InvalidHubStatus {
        Scheduled => "scheduled",
        Started => "started",
        Ended => "ended",
    }
);

impl HubStatus {
    /// Whether late shifts may still join this hub.
    #[must_use]
    pub const fn accepts_members(self) -> bool {
        matches!(self, Self::Scheduled | Self::Started)
    }
}

define_str_enum!(
    /// How a shift's participants reach their sub-room inside a hub.
    RoutingMode, InvalidRoutingMode {
        /// Every identity was pre-assigned by the provider.
        Preassigned => "preassigned",
        /// Pre-assigned where possible, self-select for flagged identities.
        Hybrid => "hybrid",
        /// Participants pick the sub-room by name.
        SelfSelect => "selfselect",
    }
);

define_str_enum!(
    /// How a timesheet entry was closed.
    CompletionMethod, InvalidCompletionMethod {
        Manual => "manual",
        /// Clock-out synthesized at the scheduled end.
        Auto => "auto",
    }
);

define_str_enum!(
    /// Which lifecycle transition a deferred task drives.
    TaskPhase, InvalidTaskPhase {
        Start => "start",
        End => "end",
    }
);
