//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Which side survived a last-write-wins comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWinner {
    Local,
    Remote,
}

impl ConflictWinner {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl FromStr for ConflictWinner {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(Error::InvalidInput(format!("Unknown conflict winner: {other}"))),
        }
    }
}

/// Recorded sync conflict resolved by strategy (LWW)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Entity involved in the conflict
    pub entity_id: String,
    /// Surviving side
    pub winner: ConflictWinner,
    /// Local copy's timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Local copy's version when the conflict occurred
    pub local_version: i64,
    /// Incoming remote timestamp
    pub incoming_updated_at: i64,
    /// Incoming remote version
    pub incoming_version: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
