//! Sync queue entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

use super::entity::{Entity, EntityId, EntityKind};

/// Kind of local mutation waiting to reach the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("Unknown sync operation: {other}"))),
        }
    }
}

/// Where an entry sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryState {
    /// Waiting to be pushed (or retried)
    Pending,
    /// Exceeded retries or rejected permanently; held for inspection
    DeadLetter,
}

impl QueueEntryState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl FromStr for QueueEntryState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(Error::InvalidInput(format!("Unknown queue state: {other}"))),
        }
    }
}

/// A durable record of one local mutation that must propagate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Local-only, sequence-ordered identifier (global FIFO key)
    pub entry_id: i64,
    /// Mutation kind
    pub operation: SyncOperation,
    /// Kind of the mutated entity
    pub entity_type: EntityKind,
    /// Mutated entity
    pub entity_id: EntityId,
    /// Entity state at enqueue time
    pub payload_snapshot: Entity,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Failed push attempts so far
    pub attempt_count: u32,
    /// Last failure message, if any
    pub last_error: Option<String>,
    /// Lifecycle state
    pub state: QueueEntryState,
}

impl SyncQueueEntry {
    #[must_use]
    pub const fn is_dead_letter(&self) -> bool {
        matches!(self.state, QueueEntryState::DeadLetter)
    }
}
