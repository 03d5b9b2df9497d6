//! Push loop: drain the sync queue in strict FIFO order.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::SyncQueueEntry;
use crate::remote::{Backoff, PushOutcome, RemoteBackend};
use crate::state::SyncEvent;

use super::{CycleGuard, SyncContext, SyncError, SyncResult};

/// Why a push cycle stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushExit {
    /// Queue is empty
    Drained,
    /// Head entry failed with a retryable error; nothing behind it was tried
    Paused {
        entry_id: i64,
        attempt: u32,
        retry_in: Duration,
    },
    Cancelled,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub acknowledged: usize,
    pub dead_lettered: Vec<i64>,
    pub exit: PushExit,
}

/// Run one push cycle: batches of `peek_batch`, one remote call per entry,
/// sequentially. Stops at the first retryable failure so that later entries
/// never overtake it. Cancellation and connectivity are checked between
/// batches only.
pub async fn push_once(
    context: &SyncContext,
    remote: &dyn RemoteBackend,
    backoff: &Backoff,
    cancel: &CancellationToken,
) -> SyncResult<PushReport> {
    if context.is_halted() {
        return Err(SyncError::Halted);
    }
    let Some(_flight) = context.push_flight().try_begin() else {
        return Err(SyncError::AlreadyRunning("push"));
    };
    let _gate = context.try_enter_sync()?;

    let settings = context.settings();
    let queue = context.queue();
    let mut report = PushReport {
        acknowledged: 0,
        dead_lettered: Vec::new(),
        exit: PushExit::Drained,
    };
    let _cycle = CycleGuard::new(context);

    loop {
        if cancel.is_cancelled() {
            report.exit = PushExit::Cancelled;
            break;
        }
        if !context.is_online() {
            report.exit = PushExit::Offline;
            break;
        }

        let batch = queue
            .peek_batch(settings.batch_size)
            .map_err(|error| context.storage_failure(error))?;
        if batch.is_empty() {
            report.exit = PushExit::Drained;
            break;
        }

        let mut paused = None;
        for entry in batch {
            if entry.payload_snapshot.owner_id != *context.owner() {
                tracing::warn!(
                    entry_id = entry.entry_id,
                    snapshot_owner = %entry.payload_snapshot.owner_id,
                    "Queue holds changes of another owner; migrate them before syncing"
                );
                return Err(SyncError::MigrationInProgress);
            }

            match PushOutcome::from(remote.push(&entry).await) {
                PushOutcome::Success => {
                    queue
                        .acknowledge(entry.entry_id)
                        .map_err(|error| context.storage_failure(error))?;
                    report.acknowledged += 1;
                    tracing::debug!(
                        entry_id = entry.entry_id,
                        entity_id = %entry.entity_id,
                        operation = %entry.operation,
                        "Pushed queue entry"
                    );
                }
                PushOutcome::PermanentFailure(error) => {
                    let reason = error.to_string();
                    let still_queued = queue
                        .dead_letter(entry.entry_id, &reason)
                        .map_err(|error| context.storage_failure(error))?;
                    if !still_queued {
                        log_superseded(&entry);
                        continue;
                    }
                    tracing::warn!(
                        entry_id = entry.entry_id,
                        entity_id = %entry.entity_id,
                        "Remote rejected queue entry permanently: {reason}"
                    );
                    report.dead_lettered.push(entry.entry_id);
                    context.emit(SyncEvent::DeadLettered {
                        entry_id: entry.entry_id,
                        reason,
                    });
                }
                PushOutcome::RetryableFailure(error) => {
                    let Some(failed) = queue
                        .mark_failed(entry.entry_id, &error.to_string())
                        .map_err(|error| context.storage_failure(error))?
                    else {
                        log_superseded(&entry);
                        continue;
                    };
                    let exhausted = queue
                        .drain_blockers(settings.max_attempts)
                        .map_err(|error| context.storage_failure(error))?;
                    for blocker in &exhausted {
                        report.dead_lettered.push(blocker.entry_id);
                        context.emit(SyncEvent::DeadLettered {
                            entry_id: blocker.entry_id,
                            reason: blocker.last_error.clone().unwrap_or_default(),
                        });
                    }
                    if exhausted.iter().any(|blocker| blocker.entry_id == entry.entry_id) {
                        continue;
                    }

                    let retry_in = backoff.delay(failed.attempt_count);
                    tracing::warn!(
                        entry_id = entry.entry_id,
                        attempt = failed.attempt_count,
                        retry_in_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                        "Push failed, pausing queue: {error}"
                    );
                    paused = Some(PushExit::Paused {
                        entry_id: entry.entry_id,
                        attempt: failed.attempt_count,
                        retry_in,
                    });
                    break;
                }
            }
        }

        if let Some(exit) = paused {
            report.exit = exit;
            break;
        }
    }

    let (remaining, _) = queue
        .counts()
        .map_err(|error| context.storage_failure(error))?;
    match report.exit {
        PushExit::Paused {
            entry_id,
            attempt,
            retry_in,
        } => context.emit(SyncEvent::PushPaused {
            entry_id,
            attempt,
            retry_in_ms: u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
        }),
        _ => context.emit(SyncEvent::PushCompleted {
            acknowledged: report.acknowledged,
            remaining,
        }),
    }
    tracing::info!(
        acknowledged = report.acknowledged,
        dead_lettered = report.dead_lettered.len(),
        remaining,
        exit = ?report.exit,
        "Push cycle finished"
    );
    Ok(report)
}

/// A pull applied a newer remote copy and discarded this entry mid-flight.
fn log_superseded(entry: &SyncQueueEntry) {
    tracing::info!(
        entry_id = entry.entry_id,
        entity_id = %entry.entity_id,
        "Queue entry was replaced by a newer remote copy during push; skipping"
    );
}
