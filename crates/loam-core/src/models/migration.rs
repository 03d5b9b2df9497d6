//! Migration progress model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the one-shot local-to-cloud migration for an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

/// Persisted progress of a migration, surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationProgress {
    /// Previously anonymous owner whose data is being uploaded
    pub source_owner: String,
    /// Account-backed owner receiving the data
    pub target_owner: String,
    /// Entities in the migration set
    pub total: usize,
    /// Entities confirmed uploaded
    pub migrated: usize,
    pub state: MigrationState,
    /// Most recent failure, cleared on completion
    pub last_error: Option<String>,
    /// Last progress update (Unix ms)
    pub updated_at: i64,
}

impl MigrationProgress {
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.state, MigrationState::Completed)
    }
}

impl fmt::Display for MigrationProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            MigrationState::Completed => {
                write!(f, "{}/{} items migrated, complete", self.migrated, self.total)
            }
            MigrationState::InProgress if self.last_error.is_some() => {
                write!(f, "{}/{} items migrated, retrying", self.migrated, self.total)
            }
            MigrationState::InProgress => {
                write!(f, "{}/{} items migrated", self.migrated, self.total)
            }
            MigrationState::NotStarted => f.write_str("migration not started"),
        }
    }
}
