//! Embedded store for Loam: entities plus the reserved `sync_*` tables

mod connection;
mod migrations;
mod queue_repository;
mod repository;
mod sync_meta_repository;

pub use connection::Database;
pub use queue_repository::SqliteSyncQueue;
pub use repository::{ApplyOutcome, EntityRepository, ReadMode, SqliteEntityRepository};
pub use sync_meta_repository::SqliteSyncMeta;
