//! CLI subcommand implementations.

pub mod events;
pub mod hosts;
pub mod hubs;
pub mod init;
pub mod reconcile;
pub mod shifts;
pub mod status;
pub mod tasks;
pub mod users;
pub mod util;
