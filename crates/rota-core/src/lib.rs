//! Core scheduling logic for tutoring shifts.
//!
//! This crate contains the domain types and engines for:
//! - Allocation: fill-first assignment of meeting hosts with alternatives
//! - Hubs: grouping small shifts into shared meetings with sub-rooms
//! - Lifecycle: deferred start/end tasks and reschedule/cancel handling
//! - Reconciliation: worked time, pay and final status from timesheets
//!
//! Storage, the task queue and the meeting provider are reached through the
//! traits in [`ports`]; the engines never touch a database or the network.

mod allocation;
pub mod config;
pub mod contact;
mod error;
pub mod event;
pub mod host;
mod hub;
pub mod interval;
mod lifecycle;
pub mod ports;
mod reconcile;
pub mod shift;
pub mod types;

#[cfg(test)]
mod testing;

pub use allocation::{AllocationGuard, DirectMeeting, HostAllocator, Unguarded};
pub use config::EngineConfig;
pub use contact::{Contact, ContactCheck, check_contact};
pub use error::{Error, Result};
pub use event::DomainEvent;
pub use host::{Host, HostUtilization};
pub use hub::{HubMeeting, HubScheduler, HubSweepReport, floor_to_bucket, room_name};
pub use interval::TimeInterval;
pub use lifecycle::{
    Actor, CancelOutcome, Lifecycle, RescanReport, ScheduleReport, SkipReason, TaskOutcome,
    TaskPayload, task_name,
};
pub use ports::{
    MeetingError, MeetingProvider, QueueError, RetryPolicy, ShiftStore, StoreError, TaskQueue,
};
pub use reconcile::{Reconciler, Reconciliation, ShiftClock, SweepReport, reconcile};
pub use shift::{HubAssignment, MeetingRef, Shift, TimesheetEntry};
pub use types::{
    CompletionMethod, HostId, HubId, HubStatus, RoutingMode, ShiftId, ShiftStatus, TaskPhase,
    UserId, ValidationError,
};
