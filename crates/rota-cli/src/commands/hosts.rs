//! Host pool administration and allocation queries.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Args;
use rota_core::{EngineConfig, Error, Host, HostAllocator, HostId, ShiftId};
use rota_db::Database;

use super::util::{format_interval, format_time, parse_interval, write_json};

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Host identity, usually the provider account email.
    pub id: String,

    /// Meetings this host may run at the same time.
    #[arg(long, default_value_t = 1)]
    pub capacity: u32,

    /// Lower values are filled first.
    #[arg(long, default_value_t = 0)]
    pub priority: i32,

    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Args)]
pub struct AllocateArgs {
    #[arg(long)]
    pub start: String,

    #[arg(long)]
    pub end: String,

    /// Ignore this shift's own booking, as when editing it.
    #[arg(long)]
    pub exclude: Option<String>,
}

pub fn add<W: Write>(writer: &mut W, db: &Database, args: &AddArgs) -> Result<()> {
    let mut host = Host::new(HostId::new(args.id.as_str())?, args.capacity, args.priority);
    host.display_name.clone_from(&args.name);
    db.upsert_host(&host)
        .with_context(|| format!("failed to save host {}", host.id))?;
    if host.max_concurrent == 0 {
        tracing::warn!(host = %host.id, "host has zero capacity and will never be allocated");
    }
    writeln!(
        writer,
        "Saved host {} (capacity {}, priority {})",
        host.id, host.max_concurrent, host.priority
    )?;
    Ok(())
}

pub fn list<W: Write>(writer: &mut W, db: &Database, json: bool) -> Result<()> {
    let hosts = db.list_hosts()?;
    if json {
        return write_json(writer, &hosts);
    }
    if hosts.is_empty() {
        writeln!(writer, "No hosts configured. Add one with 'rota hosts add'.")?;
        return Ok(());
    }
    writeln!(writer, "{:<24} {:>8} {:>8}  {:<6}  Name", "ID", "Capacity", "Priority", "Active")?;
    for host in &hosts {
        writeln!(
            writer,
            "{:<24} {:>8} {:>8}  {:<6}  {}",
            host.id,
            host.max_concurrent,
            host.priority,
            if host.active { "yes" } else { "no" },
            host.display_name.as_deref().unwrap_or("-"),
        )?;
    }
    Ok(())
}

pub fn deactivate<W: Write>(writer: &mut W, db: &Database, id: &str) -> Result<()> {
    let id = HostId::new(id)?;
    if !db.set_host_active(&id, false)? {
        bail!("host not found: {id}");
    }
    writeln!(writer, "Deactivated host {id}")?;
    Ok(())
}

/// Reports which host would take the interval, or the nearest free slots.
pub fn allocate<W: Write>(
    writer: &mut W,
    db: &Database,
    engine: &EngineConfig,
    args: &AllocateArgs,
    now: DateTime<Utc>,
) -> Result<()> {
    let interval = parse_interval(&args.start, &args.end, now)?;
    let exclude = args.exclude.as_deref().map(ShiftId::new).transpose()?;
    let allocator = HostAllocator::new(db, engine);
    match allocator.find_available_host(&interval, exclude.as_ref()) {
        Ok(host) => {
            writeln!(writer, "Available host: {}", host.id)?;
            Ok(())
        }
        Err(Error::NoAvailableHost { alternatives }) => {
            writeln!(writer, "All hosts are busy for {}.", format_interval(&interval))?;
            if alternatives.is_empty() {
                writeln!(writer, "No free slots within the search horizon.")?;
            } else {
                writeln!(writer, "Next free slots:")?;
                for slot in &alternatives {
                    writeln!(writer, "- {}", format_interval(slot))?;
                }
            }
            bail!("no host available")
        }
        Err(err) if err.is_configuration() => {
            Err(err).context("host allocation needs administrator action")
        }
        Err(err) => Err(err.into()),
    }
}

pub fn utilization<W: Write>(
    writer: &mut W,
    db: &Database,
    engine: &EngineConfig,
    now: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let report = HostAllocator::new(db, engine).host_utilization(now)?;
    if json {
        return write_json(writer, &report);
    }
    writeln!(
        writer,
        "Host utilization at {} (next {} days)",
        format_time(now),
        engine.allocator.utilization_days
    )?;
    writeln!(writer, "{:<24} {:>8} {:>8} {:>8}", "Host", "Capacity", "Now", "Upcoming")?;
    for row in &report {
        writeln!(
            writer,
            "{:<24} {:>8} {:>8} {:>8}",
            row.host.id, row.host.max_concurrent, row.current, row.upcoming
        )?;
    }
    Ok(())
}
