//! Data models for Loam

mod entity;
mod migration;
mod queue_entry;
mod sync_conflict;

pub use entity::{next_updated_at, Entity, EntityId, EntityKind, OwnerId};
pub use migration::{MigrationProgress, MigrationState};
pub use queue_entry::{QueueEntryState, SyncOperation, SyncQueueEntry};
pub use sync_conflict::{ConflictWinner, SyncConflict};
