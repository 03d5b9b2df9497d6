//! Checkpoint, migration progress and conflict log facade.

use crate::db::SqliteSyncMeta;
use crate::error::Result;
use crate::models::{MigrationProgress, OwnerId, SyncConflict};

use super::SharedDatabase;

/// Handle to the reserved bookkeeping rows of one database.
#[derive(Clone)]
pub struct SyncMeta {
    db: SharedDatabase,
}

impl SyncMeta {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn last_pulled_at(&self, owner: &OwnerId) -> Result<i64> {
        self.db
            .with_connection(|conn| SqliteSyncMeta::new(conn).last_pulled_at(owner))
    }

    pub fn advance_checkpoint(&self, owner: &OwnerId, candidate: i64) -> Result<i64> {
        self.db.with_transaction(|tx| {
            SqliteSyncMeta::new(tx).advance_checkpoint(owner, candidate)
        })
    }

    pub fn migration_progress(&self, source: &OwnerId) -> Result<Option<MigrationProgress>> {
        self.db
            .with_connection(|conn| SqliteSyncMeta::new(conn).migration_progress(source))
    }

    pub fn save_migration_progress(&self, progress: &MigrationProgress) -> Result<()> {
        self.db
            .with_connection(|conn| SqliteSyncMeta::new(conn).save_migration_progress(progress))
    }

    pub fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.db
            .with_connection(|conn| SqliteSyncMeta::new(conn).list_conflicts(limit))
    }
}
