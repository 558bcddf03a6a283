//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rota_core::ShiftStatus;

use crate::commands::{hosts, shifts, tasks, users};

/// Shift scheduling with shared meeting hosts.
///
/// Allocates meeting hosts to shifts, groups concurrent shifts into hub
/// meetings, fires start/end tasks and reconciles worked time.
#[derive(Debug, Parser)]
#[command(name = "rota", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Evaluate as if the current time were this (ISO 8601 or relative).
    #[arg(long, global = true, value_name = "TIME")]
    pub now: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the database and a starter config file.
    Init,

    /// Show stored shifts, hosts and pending work.
    Status,

    /// Manage the meeting host pool.
    #[command(subcommand)]
    Hosts(HostsAction),

    /// Manage user contact records.
    #[command(subcommand)]
    Users(UsersAction),

    /// Create, move, cancel and inspect shifts.
    #[command(subcommand)]
    Shifts(ShiftsAction),

    /// Shared hub meetings.
    #[command(subcommand)]
    Hubs(HubsAction),

    /// Deferred start/end task callbacks.
    #[command(subcommand)]
    Tasks(TasksAction),

    /// Worked-time reconciliation.
    #[command(subcommand)]
    Reconcile(ReconcileAction),

    /// Outbound notifications.
    #[command(subcommand)]
    Events(EventsAction),
}

#[derive(Debug, Subcommand)]
pub enum HostsAction {
    /// Add a host or update an existing one.
    Add(hosts::AddArgs),
    /// List every host.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Stop allocating a host.
    Deactivate { id: String },
    /// Show which host would take an interval.
    Allocate(hosts::AllocateArgs),
    /// Current and upcoming bookings per host.
    Utilization {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum UsersAction {
    /// Add or update one user.
    Add(users::AddArgs),
    /// Import user records from JSON or JSON Lines (`-` reads stdin).
    Import { path: PathBuf },
}

#[derive(Debug, Subcommand)]
pub enum ShiftsAction {
    /// Create a shift and schedule its tasks.
    Create(shifts::CreateArgs),
    /// Move a shift to new times.
    Edit(shifts::EditArgs),
    /// Cancel a shift.
    Cancel {
        id: String,
        #[command(flatten)]
        actor: shifts::ActorArgs,
    },
    /// Show one shift with its timesheet.
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// List shifts.
    List {
        /// Only shifts in this status.
        #[arg(long)]
        status: Option<ShiftStatus>,
        #[arg(long)]
        json: bool,
    },
    /// Reserve a dedicated host and create the shift's meeting.
    Provision { id: String },
    /// Open a manual timesheet entry.
    ClockIn {
        id: String,
        /// Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },
    /// Close the open timesheet entry.
    ClockOut {
        id: String,
        /// Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum HubsAction {
    /// Group upcoming shifts into hub meetings.
    Sweep {
        #[arg(long)]
        json: bool,
    },
    /// List hubs that have not ended.
    List {
        #[arg(long)]
        json: bool,
    },
    /// List who is in a hub meeting right now.
    Participants {
        hub_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Mute a live participant.
    Mute {
        hub_id: String,
        participant_id: String,
    },
    /// Remove a live participant.
    Remove {
        hub_id: String,
        participant_id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum TasksAction {
    /// Handle a start task callback.
    Start(tasks::FireArgs),
    /// Handle an end task callback.
    End(tasks::FireArgs),
    /// Schedule tasks that have come within the queue horizon.
    Rescan,
    /// Fire due tasks from the local queue.
    RunDue {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum ReconcileAction {
    /// Finalize every overdue shift.
    Sweep {
        #[arg(long)]
        json: bool,
    },
    /// Recompute worked time and pay for one shift.
    Shift {
        id: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum EventsAction {
    /// Deliver pending outbox events to the webhook.
    Dispatch {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}
