//! Status command: an overview of what is stored and what is pending.

use std::io::Write;

use anyhow::Result;
use rota_db::Database;

use crate::Config;
use crate::config::{MeetingsBackend, QueueBackend};

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    writeln!(writer, "Rota status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    let queue = match config.queue.backend {
        QueueBackend::Local => "local",
        QueueBackend::Http => "http",
    };
    let meetings = match config.meetings.backend {
        MeetingsBackend::Offline => "offline",
        MeetingsBackend::Http => "http",
    };
    writeln!(writer, "Task queue: {queue}, meetings: {meetings}")?;

    let hosts = db.list_hosts()?;
    let active = hosts.iter().filter(|h| h.is_usable()).count();
    writeln!(writer, "Hosts: {active} usable of {}", hosts.len())?;
    if active == 0 && config.engine.fallback_hosts.is_empty() {
        writeln!(writer, "Warning: no usable hosts; shifts cannot be given meetings")?;
    }

    let counts = db.shift_status_counts()?;
    if counts.is_empty() {
        writeln!(writer, "No shifts recorded.")?;
    } else {
        writeln!(writer, "Shifts:")?;
        for count in &counts {
            writeln!(writer, "- {}: {}", count.status, count.count)?;
        }
    }

    if config.queue.backend == QueueBackend::Local {
        writeln!(writer, "Queued tasks: {}", db.pending_task_count()?)?;
    }
    writeln!(writer, "Undelivered events: {}", db.pending_event_count()?)?;
    Ok(())
}
