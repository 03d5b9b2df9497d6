//! Sync status and events published to front ends.

use std::fmt;

use serde::Serialize;

use crate::models::{ConflictWinner, EntityId, MigrationProgress};

/// Display-level sync state: `synced`, `syncing`, `pendingCount:N` or `error`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SyncStatus {
    Synced,
    Syncing,
    #[serde(rename = "pendingCount")]
    Pending { count: usize },
    /// Dead letters exist, a fatal storage error halted sync, or the last
    /// cycle failed. The app stays usable locally.
    Error {
        pending: usize,
        dead_letters: usize,
        message: String,
    },
}

impl SyncStatus {
    /// Status derived from queue counts when no cycle is running.
    #[must_use]
    pub fn from_counts(pending: usize, dead_letters: usize) -> Self {
        if dead_letters > 0 {
            Self::Error {
                pending,
                dead_letters,
                message: format!("{dead_letters} change(s) could not be synced"),
            }
        } else if pending > 0 {
            Self::Pending { count: pending }
        } else {
            Self::Synced
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synced => f.write_str("synced"),
            Self::Syncing => f.write_str("syncing"),
            Self::Pending { count } => write!(f, "pendingCount:{count}"),
            Self::Error { message, .. } => write!(f, "error: {message}"),
        }
    }
}

/// Notable engine outcomes for callbacks and diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    PushCompleted { acknowledged: usize, remaining: usize },
    /// Push paused on a retryable failure; retry scheduled after `retry_in_ms`
    PushPaused { entry_id: i64, attempt: u32, retry_in_ms: u64 },
    DeadLettered { entry_id: i64, reason: String },
    PullCompleted { merged: usize, checkpoint: i64 },
    /// Fetching remote changes failed; the checkpoint did not move
    PullFailed { message: String },
    /// One side of a racing edit was discarded by last-write-wins
    ConflictDiscarded { entity_id: EntityId, winner: ConflictWinner },
    MigrationProgress(MigrationProgress),
    /// Fatal storage failure; sync is halted until restart
    Halted { message: String },
}
