//! Remote backend seam: the entity REST surface and its failure taxonomy.

mod backoff;
mod client;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Entity, OwnerId, SyncQueueEntry};

pub use backoff::Backoff;
pub use client::HttpRemoteClient;

/// Normalized remote failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// 5xx, 408, 429, timeouts and connection errors
    #[error("Transient network error: {0}")]
    TransientNetwork(String),
    /// 401/403 that survived one credential refresh (or the refresh failed)
    #[error("Authorization expired: {0}")]
    AuthExpired(String),
    /// Any other 4xx; retrying will not help
    #[error("Rejected by remote ({status}): {message}")]
    Validation { status: u16, message: String },
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    /// The response body could not be decoded
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Permanent failures go to dead-letter instead of being retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::InvalidConfiguration(_))
    }
}

/// Outcome of pushing one queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Success,
    RetryableFailure(RemoteError),
    PermanentFailure(RemoteError),
}

impl From<Result<(), RemoteError>> for PushOutcome {
    fn from(result: Result<(), RemoteError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(error) if error.is_permanent() => Self::PermanentFailure(error),
            Err(error) => Self::RetryableFailure(error),
        }
    }
}

/// The remote entity API as seen by the sync workers.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Send one queue entry as exactly one remote call.
    async fn push(&self, entry: &SyncQueueEntry) -> Result<(), RemoteError>;

    /// Upload an entity through the create path. Re-creating an existing id
    /// overwrites it.
    async fn create(&self, entity: &Entity) -> Result<(), RemoteError>;

    /// Every entity of `owner` with `updatedAt > since`, deleted ones included.
    async fn pull_since(&self, owner: &OwnerId, since: i64) -> Result<Vec<Entity>, RemoteError>;
}
