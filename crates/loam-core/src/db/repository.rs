//! Entity repository implementation (the Local Store contract)

use crate::error::{Error, Result};
use crate::models::{next_updated_at, Entity, EntityId, OwnerId};
use crate::util::unix_millis_now;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const ENTITY_COLUMNS: &str =
    "id, owner_id, kind, container_id, payload, created_at, updated_at, version, is_deleted";

/// Whether reads should see soft-deleted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// User-facing reads: soft-deleted rows are hidden
    ExcludeDeleted,
    /// Merge logic: every row is visible
    IncludeDeleted,
}

impl ReadMode {
    const fn deleted_filter(self) -> &'static str {
        match self {
            Self::ExcludeDeleted => " AND is_deleted = 0",
            Self::IncludeDeleted => "",
        }
    }
}

/// Result of a privileged remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// No local row existed
    Inserted,
    /// Local row replaced by the newer remote copy
    Updated,
    /// Incoming copy was not newer than the stored one; nothing written
    SkippedStale,
}

impl ApplyOutcome {
    #[must_use]
    pub const fn was_written(self) -> bool {
        !matches!(self, Self::SkippedStale)
    }
}

/// Trait for entity storage operations
pub trait EntityRepository {
    /// Upsert an entity by id, assigning `updated_at` and bumping `version`.
    ///
    /// A put always leaves the entity live (`deleted = false`): editing an
    /// item means the user wants it to exist.
    fn put(&self, entity: &Entity) -> Result<Entity>;

    /// Soft delete an entity. Returns the stored row; deleting an already
    /// deleted entity returns it unchanged.
    fn soft_delete(&self, id: &EntityId) -> Result<Entity>;

    /// Get an entity by ID
    fn get(&self, id: &EntityId, mode: ReadMode) -> Result<Option<Entity>>;

    /// List an owner's entities, most recently updated first
    fn query_by_owner(&self, owner_id: &OwnerId, mode: ReadMode) -> Result<Vec<Entity>>;

    /// List the entities grouped under a container, most recently updated first
    fn query_by_container(&self, container_id: &EntityId, mode: ReadMode) -> Result<Vec<Entity>>;

    /// Write a remote copy verbatim if it is strictly newer than the local one.
    fn apply_remote(&self, entity: &Entity) -> Result<ApplyOutcome>;

    /// Move every entity of `from` to `to`. Used only by migration.
    fn reassign_owner(&self, from: &OwnerId, to: &OwnerId) -> Result<usize>;
}

/// `SQLite` implementation of `EntityRepository`
pub struct SqliteEntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an entity from a database row
    fn parse_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
        let id: String = row.get(0)?;
        let owner_id: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let container_id: Option<String> = row.get(3)?;

        Ok(Entity {
            id: id.parse().map_err(|error| conversion_error(0, error))?,
            owner_id: OwnerId::new(owner_id).map_err(|error| conversion_error(1, error))?,
            kind: kind.parse().map_err(|error| conversion_error(2, error))?,
            container_id: container_id
                .map(|value| value.parse())
                .transpose()
                .map_err(|error| conversion_error(3, error))?,
            payload: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            version: row.get(7)?,
            deleted: row.get::<_, i32>(8)? != 0,
        })
    }

    fn upsert_row(&self, entity: &Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entities (id, owner_id, kind, container_id, payload, created_at, updated_at, version, is_deleted)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                kind = excluded.kind,
                container_id = excluded.container_id,
                payload = excluded.payload,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                version = excluded.version,
                is_deleted = excluded.is_deleted",
            params![
                entity.id.as_str(),
                entity.owner_id.as_str(),
                entity.kind.as_str(),
                entity.container_id.map(|id| id.as_str()),
                entity.payload,
                entity.created_at,
                entity.updated_at,
                entity.version,
                i32::from(entity.deleted)
            ],
        )?;
        Ok(())
    }

    fn query_where(&self, clause: &str, value: &str, mode: ReadMode) -> Result<Vec<Entity>> {
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE {clause} = ?{} ORDER BY updated_at DESC, id ASC",
            mode.deleted_filter()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entities = stmt
            .query_map(params![value], Self::parse_entity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn put(&self, entity: &Entity) -> Result<Entity> {
        let existing = self.get(&entity.id, ReadMode::IncludeDeleted)?;

        let mut stored = entity.clone();
        stored.deleted = false;
        stored.updated_at = next_updated_at(
            existing.as_ref().map(|current| current.updated_at),
            unix_millis_now(),
        );

        match existing {
            Some(current) => {
                if current.owner_id != entity.owner_id {
                    return Err(Error::InvalidInput(format!(
                        "Owner of entity {} cannot change",
                        entity.id
                    )));
                }
                stored.created_at = current.created_at;
                stored.version = current.version + 1;
            }
            None => {
                stored.version = 1;
            }
        }

        self.upsert_row(&stored)?;
        Ok(stored)
    }

    fn soft_delete(&self, id: &EntityId) -> Result<Entity> {
        let mut current = self
            .get(id, ReadMode::IncludeDeleted)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if current.deleted {
            return Ok(current);
        }

        current.deleted = true;
        current.updated_at = next_updated_at(Some(current.updated_at), unix_millis_now());
        current.version += 1;
        self.upsert_row(&current)?;
        Ok(current)
    }

    fn get(&self, id: &EntityId, mode: ReadMode) -> Result<Option<Entity>> {
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?{}",
            mode.deleted_filter()
        );
        let entity = self
            .conn
            .query_row(&sql, params![id.as_str()], Self::parse_entity)
            .optional()?;
        Ok(entity)
    }

    fn query_by_owner(&self, owner_id: &OwnerId, mode: ReadMode) -> Result<Vec<Entity>> {
        self.query_where("owner_id", owner_id.as_str(), mode)
    }

    fn query_by_container(&self, container_id: &EntityId, mode: ReadMode) -> Result<Vec<Entity>> {
        self.query_where("container_id", &container_id.as_str(), mode)
    }

    fn apply_remote(&self, entity: &Entity) -> Result<ApplyOutcome> {
        let existing = self.get(&entity.id, ReadMode::IncludeDeleted)?;

        let outcome = match existing {
            Some(current) if entity.precedence() <= current.precedence() => {
                tracing::debug!(
                    entity_id = %entity.id,
                    local_updated_at = current.updated_at,
                    local_version = current.version,
                    incoming_updated_at = entity.updated_at,
                    incoming_version = entity.version,
                    "Skipped stale remote write"
                );
                return Ok(ApplyOutcome::SkippedStale);
            }
            Some(_) => ApplyOutcome::Updated,
            None => ApplyOutcome::Inserted,
        };

        self.upsert_row(entity)?;
        Ok(outcome)
    }

    fn reassign_owner(&self, from: &OwnerId, to: &OwnerId) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE entities SET owner_id = ? WHERE owner_id = ?",
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
