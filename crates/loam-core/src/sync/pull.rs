//! Pull loop: fetch remote changes since the checkpoint and merge them.

use tokio_util::sync::CancellationToken;

use crate::db::{EntityRepository, ReadMode, SqliteEntityRepository, SqliteSyncMeta, SqliteSyncQueue};
use crate::models::{ConflictWinner, Entity};
use crate::remote::RemoteBackend;
use crate::state::SyncEvent;

use super::conflict::{resolve, Resolution};
use super::{CycleGuard, SyncContext, SyncError, SyncResult};

/// Why a pull cycle stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullExit {
    Completed,
    Cancelled,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullReport {
    /// Remote entities returned by the fetch
    pub fetched: usize,
    /// Entities actually written to the local store
    pub applied: usize,
    /// Racing local edits decided by last-write-wins
    pub conflicts: usize,
    /// Checkpoint after the cycle
    pub checkpoint: i64,
    pub exit: PullExit,
}

struct MergeResult {
    written: bool,
    conflict: Option<ConflictWinner>,
}

/// Run one pull cycle for the context's owner.
///
/// The checkpoint only moves to the greatest `updated_at` that was fully
/// merged. If a storage error interrupts the merge, it stops below the
/// failing entity's timestamp and sync halts.
pub async fn pull_once(
    context: &SyncContext,
    remote: &dyn RemoteBackend,
    cancel: &CancellationToken,
) -> SyncResult<PullReport> {
    if context.is_halted() {
        return Err(SyncError::Halted);
    }
    let Some(_flight) = context.pull_flight().try_begin() else {
        return Err(SyncError::AlreadyRunning("pull"));
    };
    let _gate = context.try_enter_sync()?;
    let owner = context.owner().clone();

    let since = context
        .meta()
        .last_pulled_at(&owner)
        .map_err(|error| context.storage_failure(error))?;
    let mut report = PullReport {
        fetched: 0,
        applied: 0,
        conflicts: 0,
        checkpoint: since,
        exit: PullExit::Completed,
    };
    if cancel.is_cancelled() {
        report.exit = PullExit::Cancelled;
        return Ok(report);
    }
    if !context.is_online() {
        report.exit = PullExit::Offline;
        return Ok(report);
    }

    let _cycle = CycleGuard::new(context);
    tracing::debug!(owner = %owner, since, "Pulling remote changes");
    let mut fetched = match remote.pull_since(&owner, since).await {
        Ok(fetched) => fetched,
        Err(error) => {
            context.record_pull_failure(&error);
            return Err(error.into());
        }
    };
    fetched.sort_by(|a, b| {
        a.updated_at
            .cmp(&b.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    report.fetched = fetched.len();

    if cancel.is_cancelled() {
        report.exit = PullExit::Cancelled;
        return Ok(report);
    }

    for (index, incoming) in fetched.iter().enumerate() {
        match merge_entity(context, incoming) {
            Ok(result) => {
                if result.written {
                    report.applied += 1;
                }
                if let Some(winner) = result.conflict {
                    report.conflicts += 1;
                    context.emit(SyncEvent::ConflictDiscarded {
                        entity_id: incoming.id,
                        winner,
                    });
                }
            }
            Err(error) => {
                let safe_checkpoint = fetched[..index]
                    .iter()
                    .map(|merged| merged.updated_at)
                    .filter(|updated_at| *updated_at < incoming.updated_at)
                    .max();
                if let Some(candidate) = safe_checkpoint {
                    if let Err(checkpoint_error) =
                        context.meta().advance_checkpoint(&owner, candidate)
                    {
                        tracing::error!("Failed to save partial pull checkpoint: {checkpoint_error}");
                    }
                }
                tracing::error!(
                    entity_id = %incoming.id,
                    updated_at = incoming.updated_at,
                    "Merge failed; checkpoint held below this entity"
                );
                return Err(context.storage_failure(error));
            }
        }
    }

    if let Some(newest) = fetched.last() {
        report.checkpoint = context
            .meta()
            .advance_checkpoint(&owner, newest.updated_at)
            .map_err(|error| context.storage_failure(error))?;
    }

    context.clear_pull_failure();
    tracing::info!(
        owner = %owner,
        fetched = report.fetched,
        applied = report.applied,
        conflicts = report.conflicts,
        checkpoint = report.checkpoint,
        "Pull cycle completed"
    );
    context.emit(SyncEvent::PullCompleted {
        merged: report.fetched,
        checkpoint: report.checkpoint,
    });
    Ok(report)
}

/// Merge one remote entity in a single transaction.
fn merge_entity(context: &SyncContext, incoming: &Entity) -> crate::Result<MergeResult> {
    context.database().with_transaction(|tx| {
        let repo = SqliteEntityRepository::new(tx);
        let queue = SqliteSyncQueue::new(tx);
        let local = repo.get(&incoming.id, ReadMode::IncludeDeleted)?;
        let has_pending_edit = match &local {
            Some(_) => queue.has_pending_for_entity(&incoming.id)?,
            None => false,
        };

        let resolution = resolve(local.as_ref(), has_pending_edit, incoming);
        let written = match resolution {
            Resolution::Insert | Resolution::ApplyRemote => {
                repo.apply_remote(incoming)?.was_written()
            }
            Resolution::RemoteWinsConflict => {
                let discarded = queue.discard_pending_for_entity(&incoming.id)?;
                tracing::info!(
                    entity_id = %incoming.id,
                    discarded,
                    "Remote copy is newer; discarded pending local edit"
                );
                repo.apply_remote(incoming)?.was_written()
            }
            Resolution::LocalWinsConflict => {
                tracing::info!(
                    entity_id = %incoming.id,
                    "Local edit is newer; discarded incoming remote copy"
                );
                false
            }
        };

        let conflict = resolution.conflict_winner();
        if let (Some(winner), Some(local)) = (conflict, local.as_ref()) {
            SqliteSyncMeta::new(tx).record_conflict(local, incoming, winner)?;
        }

        Ok(MergeResult { written, conflict })
    })
}
