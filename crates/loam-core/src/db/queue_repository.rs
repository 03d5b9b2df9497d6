//! Sync queue repository: the durable intent log of local mutations

use crate::error::Result;
use crate::models::{Entity, EntityId, OwnerId, QueueEntryState, SyncOperation, SyncQueueEntry};
use crate::util::unix_millis_now;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const ENTRY_COLUMNS: &str = "entry_id, operation, entity_type, entity_id, payload_snapshot, \
                             enqueued_at, attempt_count, last_error, state";

/// `SQLite` implementation of the sync queue.
///
/// Entries are ordered by `entry_id`, which is assigned by `AUTOINCREMENT`
/// and never reused, so the order is global FIFO across all entities.
pub struct SqliteSyncQueue<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncQueue<'a> {
    /// Create a new queue handle with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncQueueEntry> {
        let operation: String = row.get(1)?;
        let entity_type: String = row.get(2)?;
        let entity_id: String = row.get(3)?;
        let snapshot: serde_json::Value = row.get(4)?;
        let state: String = row.get(8)?;

        Ok(SyncQueueEntry {
            entry_id: row.get(0)?,
            operation: operation
                .parse()
                .map_err(|error| conversion_error(1, error))?,
            entity_type: entity_type
                .parse()
                .map_err(|error| conversion_error(2, error))?,
            entity_id: entity_id
                .parse()
                .map_err(|error| conversion_error(3, error))?,
            payload_snapshot: serde_json::from_value::<Entity>(snapshot)
                .map_err(|error| conversion_error(4, error))?,
            enqueued_at: row.get(5)?,
            attempt_count: row.get(6)?,
            last_error: row.get(7)?,
            state: state.parse().map_err(|error| conversion_error(8, error))?,
        })
    }

    fn select(&self, filter: &str, args: impl rusqlite::Params) -> Result<Vec<SyncQueueEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE {filter}");
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(args, Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Append an entry capturing `snapshot` as it is right now.
    pub fn enqueue(&self, operation: SyncOperation, snapshot: &Entity) -> Result<SyncQueueEntry> {
        let payload = serde_json::to_value(snapshot)?;
        let enqueued_at = unix_millis_now();

        self.conn.execute(
            "INSERT INTO sync_queue (operation, entity_type, entity_id, payload_snapshot, enqueued_at, attempt_count, state)
             VALUES (?, ?, ?, ?, ?, 0, ?)",
            params![
                operation.as_str(),
                snapshot.kind.as_str(),
                snapshot.id.as_str(),
                payload,
                enqueued_at,
                QueueEntryState::Pending.as_str()
            ],
        )?;

        let entry = SyncQueueEntry {
            entry_id: self.conn.last_insert_rowid(),
            operation,
            entity_type: snapshot.kind,
            entity_id: snapshot.id,
            payload_snapshot: snapshot.clone(),
            enqueued_at,
            attempt_count: 0,
            last_error: None,
            state: QueueEntryState::Pending,
        };
        tracing::debug!(
            entry_id = entry.entry_id,
            entity_id = %entry.entity_id,
            operation = %operation,
            "Enqueued local mutation"
        );
        Ok(entry)
    }

    /// Up to `limit` oldest pending entries, without removing them.
    pub fn peek_batch(&self, limit: usize) -> Result<Vec<SyncQueueEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.select(
            "state = ? ORDER BY entry_id ASC LIMIT ?",
            params![QueueEntryState::Pending.as_str(), limit],
        )
    }

    /// Fetch a single entry in any state.
    pub fn get(&self, entry_id: i64) -> Result<Option<SyncQueueEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE entry_id = ?");
        let entry = self
            .conn
            .query_row(&sql, params![entry_id], Self::parse_entry)
            .optional()?;
        Ok(entry)
    }

    /// Remove an entry after the remote confirmed it. Returns whether a row was removed.
    pub fn acknowledge(&self, entry_id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sync_queue WHERE entry_id = ?", params![entry_id])?;
        Ok(rows > 0)
    }

    /// Record a failed attempt and leave the entry in place for retry.
    ///
    /// Returns `None` when the entry is gone, e.g. discarded by a pull that
    /// applied a newer remote copy while the push was in flight.
    pub fn mark_failed(&self, entry_id: i64, error: &str) -> Result<Option<SyncQueueEntry>> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET attempt_count = attempt_count + 1, last_error = ? WHERE entry_id = ?",
            params![error, entry_id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        self.get(entry_id)
    }

    /// Move an entry straight to the dead-letter state (permanent failure).
    /// Returns whether the entry still existed.
    pub fn dead_letter(&self, entry_id: i64, error: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET attempt_count = attempt_count + 1, last_error = ?, state = ? WHERE entry_id = ?",
            params![error, QueueEntryState::DeadLetter.as_str(), entry_id],
        )?;
        Ok(rows > 0)
    }

    /// Move pending entries that reached `max_attempts` to the dead-letter
    /// state and return them.
    pub fn drain_blockers(&self, max_attempts: u32) -> Result<Vec<SyncQueueEntry>> {
        let blockers = self.select(
            "state = ? AND attempt_count >= ? ORDER BY entry_id ASC",
            params![QueueEntryState::Pending.as_str(), max_attempts],
        )?;

        for entry in &blockers {
            self.conn.execute(
                "UPDATE sync_queue SET state = ? WHERE entry_id = ?",
                params![QueueEntryState::DeadLetter.as_str(), entry.entry_id],
            )?;
            tracing::warn!(
                entry_id = entry.entry_id,
                entity_id = %entry.entity_id,
                attempts = entry.attempt_count,
                last_error = entry.last_error.as_deref().unwrap_or(""),
                "Moved queue entry to dead-letter after exhausting retries"
            );
        }

        Ok(blockers
            .into_iter()
            .map(|mut entry| {
                entry.state = QueueEntryState::DeadLetter;
                entry
            })
            .collect())
    }

    /// Dead-lettered entries, oldest first.
    pub fn dead_letters(&self) -> Result<Vec<SyncQueueEntry>> {
        self.select(
            "state = ? ORDER BY entry_id ASC",
            params![QueueEntryState::DeadLetter.as_str()],
        )
    }

    /// Put a dead-lettered entry back into the live queue with a fresh retry
    /// budget. It keeps its original FIFO position.
    pub fn retry_dead_letter(&self, entry_id: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET state = ?, attempt_count = 0, last_error = NULL
             WHERE entry_id = ? AND state = ?",
            params![
                QueueEntryState::Pending.as_str(),
                entry_id,
                QueueEntryState::DeadLetter.as_str()
            ],
        )?;
        Ok(rows > 0)
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.count_in_state(QueueEntryState::Pending)
    }

    pub fn dead_letter_count(&self) -> Result<usize> {
        self.count_in_state(QueueEntryState::DeadLetter)
    }

    fn count_in_state(&self, state: QueueEntryState) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE state = ?",
            params![state.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Whether the entity has an unsynced local edit waiting in the live queue.
    pub fn has_pending_for_entity(&self, entity_id: &EntityId) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sync_queue WHERE entity_id = ? AND state = ?)",
            params![entity_id.as_str(), QueueEntryState::Pending.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Drop the live entries of an entity whose local edit lost a conflict.
    pub fn discard_pending_for_entity(&self, entity_id: &EntityId) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sync_queue WHERE entity_id = ? AND state = ?",
            params![entity_id.as_str(), QueueEntryState::Pending.as_str()],
        )?;
        Ok(rows)
    }

    /// Drop live entries whose snapshot is no newer than `version`, i.e. the
    /// remote already holds that state or a later one.
    pub fn discard_superseded(&self, entity_id: &EntityId, version: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sync_queue
             WHERE entity_id = ? AND state = ?
               AND CAST(json_extract(payload_snapshot, '$.version') AS INTEGER) <= ?",
            params![
                entity_id.as_str(),
                QueueEntryState::Pending.as_str(),
                version
            ],
        )?;
        Ok(rows)
    }

    /// Rewrite the owner inside queued snapshots. Used only by migration.
    pub fn reassign_owner(&self, from: &OwnerId, to: &OwnerId) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_queue
             SET payload_snapshot = json_set(payload_snapshot, '$.ownerId', ?)
             WHERE json_extract(payload_snapshot, '$.ownerId') = ?",
            params![to.as_str(), from.as_str()],
        )?;
        Ok(rows)
    }
}

fn conversion_error(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}
