//! Engine tunables.
//!
//! Every struct deserializes with `#[serde(default)]` so a partial config file
//! only overrides what it names. The binary resolves layered configuration
//! and hands the result to the engines; nothing here reads the environment.

use std::time::Duration as StdDuration;

use chrono::{Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::host::Host;
use crate::ports::RetryPolicy;

/// Host allocation and alternative-slot search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Maximum alternatives returned when every host is saturated.
    pub max_alternatives: usize,
    /// How far past the requested start the alternative search runs.
    pub search_horizon_days: i64,
    pub slot_step_minutes: i64,
    /// Alternatives must start at or after this local hour...
    pub day_start_hour: u32,
    /// ...and end at or before this local hour on the same day.
    pub day_end_hour: u32,
    /// Offset of the "local" day used for the window above.
    pub utc_offset_minutes: i32,
    /// Look-ahead for the utilization view.
    pub utilization_days: i64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_alternatives: 5,
            search_horizon_days: 3,
            slot_step_minutes: 30,
            day_start_hour: 8,
            day_end_hour: 21,
            utc_offset_minutes: 0,
            utilization_days: 7,
        }
    }
}

impl AllocatorConfig {
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn slot_step(&self) -> Duration {
        Duration::minutes(self.slot_step_minutes.max(1))
    }
}

/// Hub bucketing and capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Bucket width. Buckets are aligned to multiples of this width since the epoch.
    pub bucket_minutes: i64,
    /// Hub meetings open this long before the bucket starts.
    pub preroll_minutes: i64,
    /// Hard participant cap per hub meeting.
    pub capacity: usize,
    /// Candidates may have started this long ago.
    pub lookback_minutes: i64,
    pub lookahead_days: i64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bucket_minutes: 120,
            preroll_minutes: 15,
            capacity: 100,
            lookback_minutes: 60,
            lookahead_days: 7,
        }
    }
}

/// Deferred-task scheduling and staleness checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Tasks never fire sooner than this after scheduling.
    pub min_lead_seconds: i64,
    /// Allowed drift between a task's snapshot and the stored time.
    pub stale_tolerance_seconds: i64,
    /// Window around "now" used for payloads without a snapshot.
    pub legacy_tolerance_minutes: i64,
    /// Furthest the queue accepts a schedule time.
    pub queue_horizon_days: i64,
    /// Task callbacks are `{callback_base_url}/tasks/{phase}`.
    pub callback_base_url: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_lead_seconds: 2,
            stale_tolerance_seconds: 60,
            legacy_tolerance_minutes: 30,
            queue_horizon_days: 30,
            callback_base_url: "local://rota".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// The sweep leaves shifts alone until they ended this long ago.
    pub sweep_grace_minutes: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            sweep_grace_minutes: 5,
        }
    }
}

/// Everything the engines need, resolved once by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub allocator: AllocatorConfig,
    pub hub: HubConfig,
    pub lifecycle: LifecycleConfig,
    pub reconcile: ReconcileConfig,
    /// Used only when the store has no active hosts.
    pub fallback_hosts: Vec<Host>,
    pub store_retry_attempts: u32,
    pub store_retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allocator: AllocatorConfig::default(),
            hub: HubConfig::default(),
            lifecycle: LifecycleConfig::default(),
            reconcile: ReconcileConfig::default(),
            fallback_hosts: Vec::new(),
            store_retry_attempts: 3,
            store_retry_backoff_ms: 50,
        }
    }
}

impl EngineConfig {
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.store_retry_attempts,
            backoff: StdDuration::from_millis(self.store_retry_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"hub": {"capacity": 40}, "allocator": {"utc_offset_minutes": -300}}"#,
        )
        .unwrap();
        assert_eq!(config.hub.capacity, 40);
        assert_eq!(config.hub.bucket_minutes, 120);
        assert_eq!(config.allocator.max_alternatives, 5);
        assert_eq!(config.allocator.local_offset().local_minus_utc(), -300 * 60);
        assert_eq!(config.lifecycle.queue_horizon_days, 30);
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let config = AllocatorConfig {
            utc_offset_minutes: 10_000,
            ..AllocatorConfig::default()
        };
        assert_eq!(config.local_offset().local_minus_utc(), 0);
    }
}
