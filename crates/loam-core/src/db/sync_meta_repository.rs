//! Reserved sync bookkeeping: checkpoints, migration progress, conflict log

use crate::error::Result;
use crate::models::{ConflictWinner, Entity, EntityId, MigrationProgress, OwnerId, SyncConflict};
use crate::util::unix_millis_now;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const CHECKPOINT_KEY_PREFIX: &str = "checkpoint:";
const MIGRATION_KEY_PREFIX: &str = "migration:";
const LWW_STRATEGY: &str = "lww";

/// Key/value and log tables that live next to user data under the `sync_` prefix.
pub struct SqliteSyncMeta<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncMeta<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_value(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_meta WHERE key = ?", params![key])?;
        Ok(())
    }

    /// The pull checkpoint for an owner; `0` before the first pull.
    pub fn last_pulled_at(&self, owner: &OwnerId) -> Result<i64> {
        let value = self.get_value(&checkpoint_key(owner))?;
        Ok(value
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or_default())
    }

    /// Move the checkpoint forward to `candidate`. Never moves it backwards.
    ///
    /// Returns the checkpoint value after the call.
    pub fn advance_checkpoint(&self, owner: &OwnerId, candidate: i64) -> Result<i64> {
        let current = self.last_pulled_at(owner)?;
        if candidate <= current {
            return Ok(current);
        }
        self.set_value(&checkpoint_key(owner), &candidate.to_string())?;
        tracing::debug!(owner = %owner, from = current, to = candidate, "Advanced pull checkpoint");
        Ok(candidate)
    }

    pub fn migration_progress(&self, source: &OwnerId) -> Result<Option<MigrationProgress>> {
        let Some(raw) = self.get_value(&migration_key(source))? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn save_migration_progress(&self, progress: &MigrationProgress) -> Result<()> {
        let raw = serde_json::to_string(progress)?;
        self.conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![format!("{MIGRATION_KEY_PREFIX}{}", progress.source_owner), raw],
        )?;
        Ok(())
    }

    /// Remember that `entity_id` was uploaded at `version` for this migration.
    pub fn record_upload(&self, source: &OwnerId, entity_id: &EntityId, version: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_migration_uploads (source_owner, entity_id, version, uploaded_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(source_owner, entity_id) DO UPDATE SET
                version = excluded.version,
                uploaded_at = excluded.uploaded_at",
            params![source.as_str(), entity_id.as_str(), version, unix_millis_now()],
        )?;
        Ok(())
    }

    /// Uploaded `(entity_id, version)` pairs for a migration source.
    pub fn uploaded_versions(&self, source: &OwnerId) -> Result<Vec<(EntityId, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, version FROM sync_migration_uploads
             WHERE source_owner = ? ORDER BY entity_id ASC",
        )?;
        let rows = stmt
            .query_map(params![source.as_str()], |row| {
                let entity_id: String = row.get(0)?;
                let entity_id = entity_id.parse::<EntityId>().map_err(|error| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(error))
                })?;
                Ok((entity_id, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn clear_uploads(&self, source: &OwnerId) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sync_migration_uploads WHERE source_owner = ?",
            params![source.as_str()],
        )?;
        Ok(rows)
    }

    /// Log the outcome of a racing local edit against an incoming remote copy.
    pub fn record_conflict(
        &self,
        local: &Entity,
        incoming: &Entity,
        winner: ConflictWinner,
    ) -> Result<SyncConflict> {
        let resolved_at = unix_millis_now();
        self.conn.execute(
            "INSERT INTO sync_conflicts (
                entity_id, winner, local_updated_at, local_version,
                incoming_updated_at, incoming_version, resolved_at, strategy
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                local.id.as_str(),
                winner.as_str(),
                local.updated_at,
                local.version,
                incoming.updated_at,
                incoming.version,
                resolved_at,
                LWW_STRATEGY
            ],
        )?;

        Ok(SyncConflict {
            id: self.conn.last_insert_rowid(),
            entity_id: local.id.as_str(),
            winner,
            local_updated_at: local.updated_at,
            local_version: local.version,
            incoming_updated_at: incoming.updated_at,
            incoming_version: incoming.version,
            resolved_at,
            strategy: LWW_STRATEGY.to_string(),
        })
    }

    /// Most recent conflicts first.
    pub fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_id, winner, local_updated_at, local_version,
                    incoming_updated_at, incoming_version, resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?",
        )?;
        let conflicts = stmt
            .query_map(params![limit], |row| {
                let winner: String = row.get(2)?;
                Ok(SyncConflict {
                    id: row.get(0)?,
                    entity_id: row.get(1)?,
                    winner: winner.parse().map_err(|error: crate::error::Error| {
                        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(error))
                    })?,
                    local_updated_at: row.get(3)?,
                    local_version: row.get(4)?,
                    incoming_updated_at: row.get(5)?,
                    incoming_version: row.get(6)?,
                    resolved_at: row.get(7)?,
                    strategy: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }
}

fn checkpoint_key(owner: &OwnerId) -> String {
    format!("{CHECKPOINT_KEY_PREFIX}{owner}")
}

fn migration_key(owner: &OwnerId) -> String {
    format!("{MIGRATION_KEY_PREFIX}{owner}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{EntityKind, MigrationState};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn owner() -> OwnerId {
        OwnerId::new("owner-1").unwrap()
    }

    #[test]
    fn test_checkpoint_starts_at_zero_and_is_monotonic() {
        let db = Database::open_in_memory().unwrap();
        let meta = SqliteSyncMeta::new(db.connection());

        assert_eq!(meta.last_pulled_at(&owner()).unwrap(), 0);
        assert_eq!(meta.advance_checkpoint(&owner(), 500).unwrap(), 500);
        assert_eq!(meta.advance_checkpoint(&owner(), 200).unwrap(), 500);
        assert_eq!(meta.last_pulled_at(&owner()).unwrap(), 500);

        let other = OwnerId::new("owner-2").unwrap();
        assert_eq!(meta.last_pulled_at(&other).unwrap(), 0);
    }

    #[test]
    fn test_migration_progress_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let meta = SqliteSyncMeta::new(db.connection());
        assert!(meta.migration_progress(&owner()).unwrap().is_none());

        let progress = MigrationProgress {
            source_owner: owner().to_string(),
            target_owner: "account-1".to_string(),
            total: 3,
            migrated: 1,
            state: MigrationState::InProgress,
            last_error: Some("HTTP 503".to_string()),
            updated_at: 42,
        };
        meta.save_migration_progress(&progress).unwrap();
        assert_eq!(meta.migration_progress(&owner()).unwrap(), Some(progress));
    }

    #[test]
    fn test_upload_ledger() {
        let db = Database::open_in_memory().unwrap();
        let meta = SqliteSyncMeta::new(db.connection());
        let id = EntityId::new();

        meta.record_upload(&owner(), &id, 1).unwrap();
        meta.record_upload(&owner(), &id, 2).unwrap();
        assert_eq!(meta.uploaded_versions(&owner()).unwrap(), vec![(id, 2)]);

        assert_eq!(meta.clear_uploads(&owner()).unwrap(), 1);
        assert!(meta.uploaded_versions(&owner()).unwrap().is_empty());
    }

    #[test]
    fn test_conflict_log() {
        let db = Database::open_in_memory().unwrap();
        let meta = SqliteSyncMeta::new(db.connection());

        let mut local = Entity::new(owner(), EntityKind::Note, json!({ "text": "local" }));
        local.updated_at = 100;
        local.version = 2;
        let mut incoming = local.clone();
        incoming.updated_at = 90;
        incoming.version = 5;

        let recorded = meta
            .record_conflict(&local, &incoming, ConflictWinner::Local)
            .unwrap();
        let listed = meta.list_conflicts(10).unwrap();
        assert_eq!(listed, vec![recorded]);
        assert_eq!(listed[0].winner, ConflictWinner::Local);
        assert_eq!(listed[0].strategy, "lww");
    }
}
