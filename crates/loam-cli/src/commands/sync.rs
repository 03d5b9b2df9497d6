use std::path::Path;

use loam_core::db::ReadMode;
use loam_core::models::MigrationProgress;
use loam_core::state::{SyncEvent, SyncStatus};
use loam_core::sync::{PushExit, SyncEngine, SyncError};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{
    dead_letter_to_item, format_dead_letter_lines, format_sync_conflict_lines,
    format_sync_timestamp, open_database, sync_conflict_to_item, DeadLetterItem, Session,
    SyncConflictItem,
};
use crate::config_profiles::LOCAL_OWNER;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SyncStatusSnapshot {
    pub profile: String,
    pub owner: String,
    pub status: SyncStatus,
    pub pending: usize,
    pub dead_letters: usize,
    pub last_pulled_at: i64,
    /// Entities still held by the local anonymous owner
    pub unmigrated: usize,
    pub migration: Option<MigrationProgress>,
}

fn engine_for(session: &Session, db_path: &Path) -> Result<SyncEngine, CliError> {
    let remote = session.remote()?;
    let db = open_database(db_path)?;
    Ok(SyncEngine::new(session.context(db), remote))
}

fn migration_hint(error: SyncError) -> CliError {
    match error {
        SyncError::MigrationInProgress => CliError::Migration(format!(
            "changes made before sign-in are still owned by '{LOCAL_OWNER}'; run `loam migrate` first"
        )),
        other => CliError::Sync(other),
    }
}

/// One push cycle followed by one pull cycle.
pub async fn run_sync(session: &Session, db_path: &Path) -> Result<(), CliError> {
    let engine = engine_for(session, db_path)?;
    let (push, pull) = engine.sync_once().await.map_err(migration_hint)?;

    match push.exit {
        PushExit::Paused {
            entry_id, attempt, ..
        } => println!(
            "Push paused at entry #{entry_id} after {attempt} failed attempt(s); run `loam sync` again later"
        ),
        _ => println!("Pushed {} change(s)", push.acknowledged),
    }
    if !push.dead_lettered.is_empty() {
        println!(
            "{} change(s) moved to dead letters; see `loam sync dead-letters`",
            push.dead_lettered.len()
        );
    }
    println!(
        "Pulled {} change(s), {} conflict(s) resolved",
        pull.applied, pull.conflicts
    );
    println!("Status: {}", engine.context().status());
    Ok(())
}

pub fn run_sync_status(session: &Session, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let context = session.context(db);
    let (pending, dead_letters) = context.queue().counts()?;
    let last_pulled_at = context.meta().last_pulled_at(&session.owner)?;

    let (unmigrated, migration) = if session.has_account() {
        let local_owner = loam_core::OwnerId::new(LOCAL_OWNER)?;
        let unmigrated = context
            .store()
            .list_by_owner(&local_owner, ReadMode::ExcludeDeleted)?
            .len();
        (unmigrated, context.meta().migration_progress(&local_owner)?)
    } else {
        (0, None)
    };

    let snapshot = SyncStatusSnapshot {
        profile: session.profile_name.clone(),
        owner: session.owner.to_string(),
        status: context.status(),
        pending,
        dead_letters,
        last_pulled_at,
        unmigrated,
        migration,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Profile:      {}", snapshot.profile);
    println!("Owner:        {}", snapshot.owner);
    println!("Status:       {}", snapshot.status);
    println!("Pending:      {}", snapshot.pending);
    println!("Dead letters: {}", snapshot.dead_letters);
    if snapshot.last_pulled_at > 0 {
        println!(
            "Last pulled:  {}",
            format_sync_timestamp(snapshot.last_pulled_at)
        );
    } else {
        println!("Last pulled:  never");
    }
    if let Some(progress) = &snapshot.migration {
        println!("Migration:    {progress}");
    } else if snapshot.unmigrated > 0 {
        println!(
            "Migration:    {} item(s) created before sign-in; run `loam migrate`",
            snapshot.unmigrated
        );
    }
    Ok(())
}

/// Run push and pull workers until Ctrl-C.
pub async fn run_sync_worker(session: &Session, db_path: &Path) -> Result<(), CliError> {
    let engine = engine_for(session, db_path)?;
    let mut events = engine.context().subscribe_events();
    let workers = engine.start();
    println!("Syncing as '{}'; press Ctrl-C to stop", session.owner);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let halted = matches!(event, SyncEvent::Halted { .. });
                    println!("{}", describe_event(&event));
                    if halted {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped sync events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    workers.shutdown().await;
    println!("Stopped. Status: {}", engine.context().status());
    Ok(())
}

pub fn describe_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::PushCompleted {
            acknowledged,
            remaining,
        } => format!("push: {acknowledged} sent, {remaining} pending"),
        SyncEvent::PushPaused {
            entry_id,
            attempt,
            retry_in_ms,
        } => format!("push: entry #{entry_id} failed (attempt {attempt}), retrying in {retry_in_ms}ms"),
        SyncEvent::DeadLettered { entry_id, reason } => {
            format!("push: entry #{entry_id} moved to dead letters: {reason}")
        }
        SyncEvent::PullCompleted { merged, checkpoint } => format!(
            "pull: {merged} change(s), checkpoint {}",
            format_sync_timestamp(*checkpoint)
        ),
        SyncEvent::PullFailed { message } => format!("pull failed, will retry: {message}"),
        SyncEvent::ConflictDiscarded { entity_id, winner } => {
            format!("conflict on {entity_id}: {} copy kept", winner.as_str())
        }
        SyncEvent::MigrationProgress(progress) => format!("migration: {progress}"),
        SyncEvent::Halted { message } => format!("halted: {message}"),
    }
}

pub fn run_sync_dead_letters(
    session: &Session,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let entries = session.context(db).queue().dead_letters()?;

    if as_json {
        let json_items = entries
            .iter()
            .map(dead_letter_to_item)
            .collect::<Vec<DeadLetterItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No dead letters.");
        return Ok(());
    }
    for line in format_dead_letter_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_sync_retry(session: &Session, entry_id: i64, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let context = session.context(db);
    if !context.queue().retry_dead_letter(entry_id)? {
        return Err(CliError::DeadLetterNotFound(entry_id));
    }
    context.refresh_status();
    println!("Entry #{entry_id} queued for retry");
    Ok(())
}

pub fn run_sync_conflicts(
    session: &Session,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let conflicts = session.context(db).meta().list_conflicts(limit)?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
