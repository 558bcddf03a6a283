//! Fill-first host allocation.
//!
//! Hosts are consulted in priority order and the first one whose overlapping
//! bookings are below its capacity wins, so lower-priority hosts only see
//! traffic once every preferred host is saturated for that interval.
//!
//! # Concurrency
//!
//! Allocation reads the current load and then writes the pick without a
//! cross-shift lock. Two callers racing for overlapping intervals can both
//! see spare capacity and over-book a host. Callers that need a strict
//! guarantee pass an [`AllocationGuard`] that serializes allocation per
//! time bucket.

use chrono::{DateTime, Duration, FixedOffset, Utc};

use crate::config::{AllocatorConfig, EngineConfig};
use crate::error::{Error, Result};
use crate::event::{DomainEvent, publish};
use crate::host::{Host, HostUtilization, sort_by_priority};
use crate::interval::{TimeInterval, count_overlapping};
use crate::ports::{MeetingError, MeetingProvider, MeetingRequest, ShiftStore};
use crate::shift::{MeetingRef, Shift};
use crate::types::{HostId, ShiftId};

/// Serializes the pick-and-persist step of allocation for one time window.
pub trait AllocationGuard {
    /// Runs `critical` while holding whatever lock covers `window`.
    fn serialize(&self, window: &TimeInterval, critical: &mut dyn FnMut() -> Result<()>)
    -> Result<()>;
}

/// Default guard: no locking.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unguarded;

impl AllocationGuard for Unguarded {
    fn serialize(
        &self,
        _window: &TimeInterval,
        critical: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        critical()
    }
}

/// Result of provisioning a single-shift meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMeeting {
    pub host_id: HostId,
    /// `None` when the provider call failed; the host stays reserved.
    pub meeting: Option<MeetingRef>,
}

pub struct HostAllocator<'a> {
    store: &'a dyn ShiftStore,
    config: &'a EngineConfig,
    guard: &'a dyn AllocationGuard,
}

impl<'a> HostAllocator<'a> {
    pub fn new(store: &'a dyn ShiftStore, config: &'a EngineConfig) -> Self {
        Self {
            store,
            config,
            guard: &Unguarded,
        }
    }

    #[must_use]
    pub fn with_guard(mut self, guard: &'a dyn AllocationGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Usable hosts in allocation order.
    ///
    /// Active hosts from the store take precedence; configured fallback hosts
    /// are used only when the store has none.
    pub fn host_pool(&self) -> Result<Vec<Host>> {
        let retry = self.config.retry_policy();
        let mut hosts: Vec<Host> = retry
            .run("active_hosts", || self.store.active_hosts())?
            .into_iter()
            .filter(Host::is_usable)
            .collect();
        if hosts.is_empty() {
            hosts = self
                .config
                .fallback_hosts
                .iter()
                .filter(|host| host.is_usable())
                .cloned()
                .collect();
            if !hosts.is_empty() {
                tracing::debug!(count = hosts.len(), "using configured fallback hosts");
            }
        }
        if hosts.is_empty() {
            return Err(Error::NoHostsConfigured);
        }
        sort_by_priority(&mut hosts);
        Ok(hosts)
    }

    /// Returns the first host in priority order with spare capacity for `interval`.
    ///
    /// Bookings belonging to `exclude` are ignored so a shift being edited does
    /// not count against itself.
    pub fn find_available_host(
        &self,
        interval: &TimeInterval,
        exclude: Option<&ShiftId>,
    ) -> Result<Host> {
        let pool = self.host_pool()?;
        let retry = self.config.retry_policy();
        for host in &pool {
            let committed = retry.run("committed_intervals", || {
                self.store.committed_intervals(&host.id, interval, exclude)
            })?;
            let load = count_overlapping(&committed, interval);
            tracing::debug!(
                host = %host.id,
                load,
                capacity = host.max_concurrent,
                "checked host load"
            );
            if load < host.capacity() {
                return Ok(host.clone());
            }
        }

        let alternatives = self.alternatives(&pool, interval, exclude)?;
        tracing::info!(
            start = %interval.start,
            end = %interval.end,
            alternatives = alternatives.len(),
            "all hosts saturated"
        );
        Err(Error::NoAvailableHost { alternatives })
    }

    /// Picks a host and persists it under the allocation guard.
    pub fn reserve(
        &self,
        interval: &TimeInterval,
        exclude: Option<&ShiftId>,
        persist: impl FnOnce(&Host) -> Result<()>,
    ) -> Result<Host> {
        let mut persist = Some(persist);
        let mut picked = None;
        self.guard.serialize(interval, &mut || {
            let host = self.find_available_host(interval, exclude)?;
            if let Some(persist) = persist.take() {
                persist(&host)?;
            }
            picked = Some(host);
            Ok(())
        })?;
        picked.ok_or(Error::NoAvailableHost {
            alternatives: Vec::new(),
        })
    }

    /// Best-effort `last_used_at` update.
    pub fn touch(&self, host: &HostId, now: DateTime<Utc>) {
        if let Err(err) = self.store.touch_host(host, now) {
            tracing::warn!(host = %host, error = %err, "failed to update host last_used_at");
        }
    }

    /// Earliest slots of the requested length that some host could take.
    ///
    /// Each host's bookings are fetched once for the whole search horizon.
    fn alternatives(
        &self,
        pool: &[Host],
        requested: &TimeInterval,
        exclude: Option<&ShiftId>,
    ) -> Result<Vec<TimeInterval>> {
        let cfg = &self.config.allocator;
        let step = cfg.slot_step();
        let horizon_end = requested.start + Duration::days(cfg.search_horizon_days);
        let window = TimeInterval::unchecked(requested.start, horizon_end + requested.duration());
        let retry = self.config.retry_policy();

        let booked = pool
            .iter()
            .map(|host| {
                retry
                    .run("committed_intervals", || {
                        self.store.committed_intervals(&host.id, &window, exclude)
                    })
                    .map(|committed| (host.capacity(), committed))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let offset = cfg.local_offset();
        let mut found = Vec::new();
        let mut slot_start = ceil_to_step(requested.start, step) + step;
        while slot_start < horizon_end && found.len() < cfg.max_alternatives {
            let slot = requested.moved_to(slot_start);
            let has_room = booked
                .iter()
                .any(|(capacity, committed)| count_overlapping(committed, &slot) < *capacity);
            if within_local_day(&slot, offset, cfg) && has_room {
                found.push(slot);
            }
            slot_start += step;
        }
        Ok(found)
    }

    /// Allocates a host for one shift and creates its meeting.
    ///
    /// The host is written to the shift before the provider is called. A
    /// provider failure is recorded as an event and leaves the host in place;
    /// only a misconfigured provider is returned as an error.
    pub fn provision_direct_meeting(
        &self,
        meetings: &dyn MeetingProvider,
        shift_id: &ShiftId,
        now: DateTime<Utc>,
    ) -> Result<DirectMeeting> {
        let shift = self
            .store
            .get_shift(shift_id)?
            .ok_or_else(|| Error::ShiftNotFound(shift_id.clone()))?;
        if shift.status.is_terminal() {
            return Err(Error::ShiftClosed {
                id: shift.id,
                status: shift.status,
            });
        }
        if let Some(hub) = &shift.hub {
            return Err(Error::InHub {
                id: shift.id.clone(),
                hub_id: hub.hub_id.clone(),
            });
        }
        if let (Some(host_id), Some(meeting)) = (&shift.host_id, &shift.meeting) {
            return Ok(DirectMeeting {
                host_id: host_id.clone(),
                meeting: Some(meeting.clone()),
            });
        }

        let host_id = match &shift.host_id {
            Some(host_id) => host_id.clone(),
            None => self.assign_host(&shift, now)?,
        };

        let request = MeetingRequest {
            topic: direct_topic(&shift),
            start: shift.start,
            duration_minutes: ceil_minutes(shift.interval().duration()),
            host: host_id.clone(),
            breakout_rooms: Vec::new(),
        };
        match meetings.create_meeting(&request) {
            Ok(meeting) => {
                self.store.set_meeting(&shift.id, &meeting)?;
                tracing::info!(
                    shift_id = %shift.id,
                    host = %host_id,
                    meeting_id = %meeting.meeting_id,
                    "created direct meeting"
                );
                Ok(DirectMeeting {
                    host_id,
                    meeting: Some(meeting),
                })
            }
            Err(err @ MeetingError::Misconfigured(_)) => Err(err.into()),
            Err(err) => {
                tracing::warn!(
                    shift_id = %shift.id,
                    host = %host_id,
                    error = %err,
                    "meeting creation failed"
                );
                publish(
                    self.store,
                    &[DomainEvent::MeetingProvisionFailed {
                        shift_id: shift.id.clone(),
                        error: err.to_string(),
                    }],
                );
                Ok(DirectMeeting {
                    host_id,
                    meeting: None,
                })
            }
        }
    }

    /// Allocates and persists a direct host for `shift`, excluding its own booking.
    pub(crate) fn assign_host(&self, shift: &Shift, now: DateTime<Utc>) -> Result<HostId> {
        let host = self.reserve(&shift.interval(), Some(&shift.id), |host| {
            self.store.set_host(&shift.id, Some(&host.id))?;
            Ok(())
        })?;
        tracing::info!(shift_id = %shift.id, host = %host.id, "assigned host");
        publish(
            self.store,
            &[DomainEvent::HostAssigned {
                shift_id: shift.id.clone(),
                host_id: host.id.clone(),
            }],
        );
        self.touch(&host.id, now);
        Ok(host.id)
    }

    /// Current and upcoming bookings per host.
    pub fn host_utilization(&self, now: DateTime<Utc>) -> Result<Vec<HostUtilization>> {
        let horizon = now + Duration::days(self.config.allocator.utilization_days);
        let window = TimeInterval::unchecked(now, horizon);
        let retry = self.config.retry_policy();
        self.host_pool()?
            .into_iter()
            .map(|host| {
                let booked = retry.run("committed_intervals", || {
                    self.store.committed_intervals(&host.id, &window, None)
                })?;
                let current = booked.iter().filter(|b| b.contains(now)).count();
                let upcoming = booked
                    .iter()
                    .filter(|b| b.start > now && b.start <= horizon)
                    .count();
                Ok(HostUtilization {
                    host,
                    current,
                    upcoming,
                })
            })
            .collect()
    }
}

fn direct_topic(shift: &Shift) -> String {
    match shift.participants_label() {
        Some(participants) => format!("{} with {participants}", shift.organizer_label()),
        None => format!("{} session", shift.organizer_label()),
    }
}

pub(crate) fn ceil_minutes(duration: Duration) -> i64 {
    let ms = duration.num_milliseconds().max(0);
    (ms + 59_999) / 60_000
}

/// Rounds up to the next multiple of `step` since the epoch.
fn ceil_to_step(instant: DateTime<Utc>, step: Duration) -> DateTime<Utc> {
    let step_secs = step.num_seconds().max(1);
    let secs = instant.timestamp();
    let rem = secs.rem_euclid(step_secs);
    let aligned = if rem == 0 && instant.timestamp_subsec_nanos() == 0 {
        secs
    } else {
        secs - rem + step_secs
    };
    DateTime::from_timestamp(aligned, 0).unwrap_or(instant)
}

fn within_local_day(slot: &TimeInterval, offset: FixedOffset, cfg: &AllocatorConfig) -> bool {
    let start = slot.start.with_timezone(&offset).naive_local();
    let end = slot.end.with_timezone(&offset).naive_local();
    let day = start.date();
    match (
        day.and_hms_opt(cfg.day_start_hour, 0, 0),
        day.and_hms_opt(cfg.day_end_hour, 0, 0),
    ) {
        (Some(open), Some(close)) => start >= open && end <= close,
        _ => false,
    }
}
