//! Rota command-line library.
//!
//! Wires the scheduling engines in `rota-core` to the SQLite store and the
//! configured remote services.

mod adapters;
mod cli;
pub mod commands;
pub mod config;

pub use adapters::Services;
pub use cli::{
    Cli, Commands, EventsAction, HostsAction, HubsAction, ReconcileAction, ShiftsAction,
    TasksAction, UsersAction,
};
pub use config::Config;
