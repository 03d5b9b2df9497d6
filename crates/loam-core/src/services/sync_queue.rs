//! Sync Queue facade over the shared database.

use crate::db::SqliteSyncQueue;
use crate::error::Result;
use crate::models::SyncQueueEntry;

use super::SharedDatabase;

/// Handle to the durable queue of local mutations awaiting the remote.
///
/// Entries are appended by [`super::LocalStore`]; this handle is what the push
/// worker and the inspection commands use.
#[derive(Clone)]
pub struct SyncQueue {
    db: SharedDatabase,
}

impl SyncQueue {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn peek_batch(&self, limit: usize) -> Result<Vec<SyncQueueEntry>> {
        self.db
            .with_connection(|conn| SqliteSyncQueue::new(conn).peek_batch(limit))
    }

    pub fn acknowledge(&self, entry_id: i64) -> Result<bool> {
        self.db
            .with_connection(|conn| SqliteSyncQueue::new(conn).acknowledge(entry_id))
    }

    pub fn mark_failed(&self, entry_id: i64, error: &str) -> Result<Option<SyncQueueEntry>> {
        self.db
            .with_connection(|conn| SqliteSyncQueue::new(conn).mark_failed(entry_id, error))
    }

    pub fn dead_letter(&self, entry_id: i64, error: &str) -> Result<bool> {
        self.db
            .with_connection(|conn| SqliteSyncQueue::new(conn).dead_letter(entry_id, error))
    }

    pub fn drain_blockers(&self, max_attempts: u32) -> Result<Vec<SyncQueueEntry>> {
        self.db
            .with_transaction(|tx| SqliteSyncQueue::new(tx).drain_blockers(max_attempts))
    }

    pub fn dead_letters(&self) -> Result<Vec<SyncQueueEntry>> {
        self.db
            .with_connection(|conn| SqliteSyncQueue::new(conn).dead_letters())
    }

    pub fn retry_dead_letter(&self, entry_id: i64) -> Result<bool> {
        self.db
            .with_connection(|conn| SqliteSyncQueue::new(conn).retry_dead_letter(entry_id))
    }

    /// `(pending, dead_letters)` read under one lock.
    pub fn counts(&self) -> Result<(usize, usize)> {
        self.db.with_connection(|conn| {
            let queue = SqliteSyncQueue::new(conn);
            Ok((queue.pending_count()?, queue.dead_letter_count()?))
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.counts()?.0 == 0)
    }
}
