//! In-memory, tenant-partitioned entity table.

use std::collections::BTreeMap;
use std::sync::Arc;

use loam_core::{Entity, EntityId, OwnerId};
use tokio::sync::RwLock;

use crate::error::AppError;

/// How a write addresses the target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `POST /entities`: insert, or replay onto an existing row
    Upsert,
    /// `PATCH /entities/{id}`: the row must already exist
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub entity: Entity,
    pub created: bool,
    /// False when the stored row already had a newer `(updated_at, version)`
    pub applied: bool,
}

#[derive(Clone, Default)]
pub struct EntityStore {
    rows: Arc<RwLock<BTreeMap<EntityId, Entity>>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Write `incoming` on behalf of `caller`.
    ///
    /// Rows are never handed across tenants, and a write older than the
    /// stored row is acknowledged without replacing it so client retries
    /// stay idempotent.
    pub async fn write(
        &self,
        caller: &OwnerId,
        incoming: Entity,
        mode: WriteMode,
    ) -> Result<WriteOutcome, AppError> {
        if incoming.owner_id != *caller {
            return Err(AppError::unprocessable(format!(
                "entity {} carries owner '{}' but the token belongs to '{}'",
                incoming.id, incoming.owner_id, caller
            )));
        }

        let mut rows = self.rows.write().await;
        let existing = rows.get(&incoming.id);
        if let Some(existing) = existing {
            if existing.owner_id != *caller {
                return Err(AppError::forbidden(format!(
                    "entity {} belongs to another tenant",
                    incoming.id
                )));
            }
        } else if mode == WriteMode::Update {
            return Err(AppError::not_found(format!(
                "entity {} does not exist",
                incoming.id
            )));
        }

        if let Some(container_id) = incoming.container_id {
            let container_ok = rows
                .get(&container_id)
                .is_some_and(|container| container.owner_id == *caller);
            if !container_ok {
                return Err(AppError::unprocessable(format!(
                    "container {container_id} does not exist"
                )));
            }
        }

        let created = existing.is_none();
        if let Some(existing) = existing {
            if existing.precedence() > incoming.precedence() {
                tracing::debug!(
                    entity_id = %incoming.id,
                    stored_version = existing.version,
                    incoming_version = incoming.version,
                    "Ignoring stale write"
                );
                return Ok(WriteOutcome {
                    entity: existing.clone(),
                    created: false,
                    applied: false,
                });
            }
        }

        rows.insert(incoming.id, incoming.clone());
        Ok(WriteOutcome {
            entity: incoming,
            created,
            applied: true,
        })
    }

    /// Rows of `owner` changed strictly after `since`, oldest first.
    pub async fn changed_since(
        &self,
        owner: &OwnerId,
        since: i64,
        include_deleted: bool,
    ) -> Vec<Entity> {
        let rows = self.rows.read().await;
        let mut changed = rows
            .values()
            .filter(|entity| entity.owner_id == *owner)
            .filter(|entity| entity.updated_at > since)
            .filter(|entity| include_deleted || !entity.deleted)
            .cloned()
            .collect::<Vec<_>>();
        changed.sort_by(|a, b| (a.updated_at, a.id).cmp(&(b.updated_at, b.id)));
        changed
    }
}

#[cfg(test)]
mod tests {
    use loam_core::EntityKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn owner(name: &str) -> OwnerId {
        OwnerId::new(name).unwrap()
    }

    fn note(owner_id: OwnerId, updated_at: i64, version: i64) -> Entity {
        let mut entity = Entity::new(owner_id, EntityKind::Note, json!({ "text": "hi" }));
        entity.updated_at = updated_at;
        entity.version = version;
        entity
    }

    #[tokio::test]
    async fn stale_writes_are_acknowledged_but_not_applied() {
        let store = EntityStore::new();
        let alice = owner("alice");
        let newer = note(alice.clone(), 200, 2);
        store
            .write(&alice, newer.clone(), WriteMode::Upsert)
            .await
            .unwrap();

        let mut older = newer.clone();
        older.updated_at = 100;
        older.version = 1;
        let outcome = store.write(&alice, older, WriteMode::Update).await.unwrap();

        assert!(!outcome.applied);
        assert_eq!(outcome.entity, newer);
        assert_eq!(store.changed_since(&alice, 0, true).await, vec![newer]);
    }

    #[tokio::test]
    async fn changed_since_is_exclusive_and_ordered() {
        let store = EntityStore::new();
        let alice = owner("alice");
        let bob = owner("bob");
        let first = note(alice.clone(), 100, 1);
        let second = note(alice.clone(), 300, 1);
        let mut removed = note(alice.clone(), 200, 2);
        removed.deleted = true;
        for entity in [second.clone(), first.clone(), removed.clone()] {
            store.write(&alice, entity, WriteMode::Upsert).await.unwrap();
        }
        store
            .write(&bob, note(bob.clone(), 500, 1), WriteMode::Upsert)
            .await
            .unwrap();

        assert_eq!(
            store.changed_since(&alice, 100, true).await,
            vec![removed, second.clone()]
        );
        assert_eq!(store.changed_since(&alice, 0, false).await, vec![first, second]);
    }
}
