//! Meeting hosts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::HostId;

/// A capacity-bounded meeting-hosting identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    /// Maximum meetings this host may run at the same instant.
    pub max_concurrent: u32,
    /// Lower is preferred.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

const fn default_active() -> bool {
    true
}

impl Host {
    pub const fn new(id: HostId, max_concurrent: u32, priority: i32) -> Self {
        Self {
            id,
            max_concurrent,
            priority,
            active: true,
            display_name: None,
            last_used_at: None,
        }
    }

    /// Hosts with zero capacity never receive bookings.
    pub const fn is_usable(&self) -> bool {
        self.active && self.max_concurrent > 0
    }

    pub fn capacity(&self) -> usize {
        self.max_concurrent as usize
    }
}

/// Orders hosts for fill-first allocation: priority, then id.
pub fn sort_by_priority(hosts: &mut [Host]) {
    hosts.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
}

/// Booking counts for the admin view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostUtilization {
    pub host: Host,
    /// Bookings whose interval contains "now".
    pub current: usize,
    /// Bookings starting within the look-ahead window.
    pub upcoming: usize,
}
