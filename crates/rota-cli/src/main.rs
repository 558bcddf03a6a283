use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use rota_core::TaskPhase;
use tracing_subscriber::EnvFilter;

use rota_cli::commands::hubs::Moderation;
use rota_cli::commands::{
    events, hosts, hubs, init, reconcile, shifts, status, tasks, users, util,
};
use rota_cli::config::default_config_file;
use rota_cli::{
    Cli, Commands, Config, EventsAction, HostsAction, HubsAction, ReconcileAction, Services,
    ShiftsAction, TasksAction, UsersAction,
};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(rota_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = rota_db::Database::open(&config.database_path).context("failed to open database")?;
    Ok((db, config))
}

fn resolve_now(cli: &Cli) -> Result<DateTime<Utc>> {
    let now = Utc::now();
    match &cli.now {
        Some(text) => util::parse_datetime(text, now).context("invalid --now"),
        None => Ok(now),
    }
}

#[expect(
    clippy::too_many_lines,
    reason = "CLI command dispatch is inherently verbose"
)]
fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so command output stays parseable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let now = resolve_now(&cli)?;
    let (db, config) = open_database(cli.config.as_deref())?;
    let engine = &config.engine;
    let mut out = std::io::stdout().lock();
    let services = || Services::from_config(&config).context("failed to set up remote services");

    match command {
        Commands::Init => {
            let config_file = cli.config.clone().or_else(default_config_file);
            init::run(&mut out, config_file.as_deref(), &config)?;
        }
        Commands::Status => status::run(&mut out, &db, &config)?,
        Commands::Hosts(action) => match action {
            HostsAction::Add(args) => hosts::add(&mut out, &db, args)?,
            HostsAction::List { json } => hosts::list(&mut out, &db, *json)?,
            HostsAction::Deactivate { id } => hosts::deactivate(&mut out, &db, id)?,
            HostsAction::Allocate(args) => hosts::allocate(&mut out, &db, engine, args, now)?,
            HostsAction::Utilization { json } => {
                hosts::utilization(&mut out, &db, engine, now, *json)?;
            }
        },
        Commands::Users(action) => match action {
            UsersAction::Add(args) => users::add(&mut out, &db, args)?,
            UsersAction::Import { path } => users::import(&mut out, &db, path)?,
        },
        Commands::Shifts(action) => match action {
            ShiftsAction::Create(args) => {
                shifts::create(&mut out, &db, &services()?, engine, args, now)?;
            }
            ShiftsAction::Edit(args) => {
                shifts::edit(&mut out, &db, &services()?, engine, args, now)?;
            }
            ShiftsAction::Cancel { id, actor } => {
                shifts::cancel(&mut out, &db, &services()?, engine, id, actor, now)?;
            }
            ShiftsAction::Show { id, json } => shifts::show(&mut out, &db, id, *json)?,
            ShiftsAction::List { status, json } => shifts::list(&mut out, &db, *status, *json)?,
            ShiftsAction::Provision { id } => {
                shifts::provision(&mut out, &db, &services()?, engine, id, now)?;
            }
            ShiftsAction::ClockIn { id, at } => {
                shifts::clock_in(&mut out, &db, engine, id, at.as_deref(), now)?;
            }
            ShiftsAction::ClockOut { id, at } => {
                shifts::clock_out(&mut out, &db, engine, id, at.as_deref(), now)?;
            }
        },
        Commands::Hubs(action) => match action {
            HubsAction::Sweep { json } => {
                hubs::sweep(&mut out, &db, &services()?, engine, now, *json)?;
            }
            HubsAction::List { json } => hubs::list(&mut out, &db, now, *json)?,
            HubsAction::Participants { hub_id, json } => {
                hubs::participants(&mut out, &db, &services()?, hub_id, *json)?;
            }
            HubsAction::Mute {
                hub_id,
                participant_id,
            } => hubs::moderate(
                &mut out,
                &db,
                &services()?,
                hub_id,
                participant_id,
                Moderation::Mute,
            )?,
            HubsAction::Remove {
                hub_id,
                participant_id,
            } => hubs::moderate(
                &mut out,
                &db,
                &services()?,
                hub_id,
                participant_id,
                Moderation::Remove,
            )?,
        },
        Commands::Tasks(action) => match action {
            TasksAction::Start(args) => {
                tasks::fire(&mut out, &db, &services()?, engine, TaskPhase::Start, args, now)?;
            }
            TasksAction::End(args) => {
                tasks::fire(&mut out, &db, &services()?, engine, TaskPhase::End, args, now)?;
            }
            TasksAction::Rescan => tasks::rescan(&mut out, &db, &services()?, engine, now)?,
            TasksAction::RunDue { limit } => {
                tasks::run_due(&mut out, &db, &services()?, engine, *limit, now)?;
            }
        },
        Commands::Reconcile(action) => match action {
            ReconcileAction::Sweep { json } => reconcile::sweep(&mut out, &db, engine, now, *json)?,
            ReconcileAction::Shift { id, json } => {
                reconcile::shift(&mut out, &db, engine, id, *json)?;
            }
        },
        Commands::Events(EventsAction::Dispatch { limit }) => {
            events::dispatch(&mut out, &db, &services()?, *limit, now)?;
        }
    }

    out.flush()?;
    Ok(())
}
