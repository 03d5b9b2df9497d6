//! Loam CLI - local-first notes, lists and task containers from the terminal
//!
//! Every command works offline against the local database; `loam sync` and
//! `loam sync run` exchange changes with the remote API.

mod cli;
mod commands;
mod config_profiles;
mod error;

use std::path::Path;

use clap::Parser;

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::add::run_add;
use crate::commands::common::{resolve_db_path, Session};
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::{run_list, ListOptions};
use crate::commands::migrate::run_migrate;
use crate::commands::sync::{
    run_sync, run_sync_conflicts, run_sync_dead_letters, run_sync_retry, run_sync_status,
    run_sync_worker,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "loam=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Config { command } => run_config(command, profile),
        command => {
            let db_path = resolve_db_path(cli.db_path)?;
            let session = Session::load(profile)?;
            run_command(command, &session, &db_path).await
        }
    }
}

async fn run_command(command: Commands, session: &Session, db_path: &Path) -> Result<(), CliError> {
    match command {
        Commands::Add {
            kind,
            container,
            content,
        } => run_add(kind.into(), container.as_deref(), &content, session, db_path)?,
        Commands::List {
            limit,
            kind,
            container,
            deleted,
            json,
        } => {
            let options = ListOptions {
                limit,
                kind: kind.map(Into::into),
                container: container.as_deref(),
                include_deleted: deleted,
                as_json: json,
            };
            run_list(&options, session, db_path)?;
        }
        Commands::Edit { id, content } => run_edit(&id, content.as_deref(), session, db_path)?,
        Commands::Delete { id } => run_delete(&id, session, db_path)?,
        Commands::Sync { command } => match command {
            None => run_sync(session, db_path).await?,
            Some(SyncCommands::Status { json }) => run_sync_status(session, json, db_path)?,
            Some(SyncCommands::Run) => run_sync_worker(session, db_path).await?,
            Some(SyncCommands::DeadLetters { json }) => {
                run_sync_dead_letters(session, json, db_path)?;
            }
            Some(SyncCommands::Retry { entry_id }) => run_sync_retry(session, entry_id, db_path)?,
            Some(SyncCommands::Conflicts { limit, json }) => {
                run_sync_conflicts(session, limit, json, db_path)?;
            }
        },
        Commands::Migrate { from, once } => {
            run_migrate(session, from.as_deref(), once, db_path).await?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
