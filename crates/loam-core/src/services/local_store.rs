//! Local Store facade: optimistic CRUD with enqueue in the same transaction.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::db::{EntityRepository, ReadMode, SqliteEntityRepository, SqliteSyncQueue};
use crate::error::{Error, Result};
use crate::models::{Entity, EntityId, OwnerId, SyncOperation};

use super::SharedDatabase;

/// User-facing entity store.
///
/// Every mutation writes the entity and its queue entry in one transaction,
/// so a mutation that returns `Ok` always has a durable queue entry behind it.
/// Nothing here touches the network.
#[derive(Clone)]
pub struct LocalStore {
    db: SharedDatabase,
    push_trigger: Arc<Notify>,
}

impl LocalStore {
    pub fn new(db: SharedDatabase, push_trigger: Arc<Notify>) -> Self {
        Self { db, push_trigger }
    }

    /// Create or update an entity and enqueue the change.
    pub fn save(&self, entity: &Entity) -> Result<Entity> {
        let stored = self.db.with_transaction(|tx| {
            let repo = SqliteEntityRepository::new(tx);
            let existing = repo.get(&entity.id, ReadMode::IncludeDeleted)?;
            if let Some(container_id) = entity.container_id {
                validate_container(&repo, entity, &container_id)?;
            }

            let stored = repo.put(entity)?;
            let operation = if existing.is_some() {
                SyncOperation::Update
            } else {
                SyncOperation::Create
            };
            SqliteSyncQueue::new(tx).enqueue(operation, &stored)?;
            Ok(stored)
        })?;

        tracing::debug!(entity_id = %stored.id, version = stored.version, "Saved entity");
        self.push_trigger.notify_one();
        Ok(stored)
    }

    /// Soft delete an entity and enqueue the delete. Deleting twice is a no-op.
    pub fn delete(&self, id: &EntityId) -> Result<Entity> {
        let (stored, enqueued) = self.db.with_transaction(|tx| {
            let repo = SqliteEntityRepository::new(tx);
            let was_deleted = repo
                .get(id, ReadMode::IncludeDeleted)?
                .is_some_and(|current| current.deleted);

            let stored = repo.soft_delete(id)?;
            if !was_deleted {
                SqliteSyncQueue::new(tx).enqueue(SyncOperation::Delete, &stored)?;
            }
            Ok((stored, !was_deleted))
        })?;

        if enqueued {
            tracing::debug!(entity_id = %stored.id, "Soft deleted entity");
            self.push_trigger.notify_one();
        }
        Ok(stored)
    }

    pub fn get(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.read(|repo| repo.get(id, ReadMode::ExcludeDeleted))
    }

    /// Get an entity even if it was soft deleted.
    pub fn get_including_deleted(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.read(|repo| repo.get(id, ReadMode::IncludeDeleted))
    }

    pub fn list_by_owner(&self, owner_id: &OwnerId, mode: ReadMode) -> Result<Vec<Entity>> {
        self.read(|repo| repo.query_by_owner(owner_id, mode))
    }

    pub fn list_by_container(&self, container_id: &EntityId, mode: ReadMode) -> Result<Vec<Entity>> {
        self.read(|repo| repo.query_by_container(container_id, mode))
    }

    fn read<T>(&self, f: impl FnOnce(&SqliteEntityRepository<'_>) -> Result<T>) -> Result<T> {
        self.db
            .with_connection(|conn| f(&SqliteEntityRepository::new(conn)))
    }
}

fn validate_container(
    repo: &SqliteEntityRepository<'_>,
    entity: &Entity,
    container_id: &EntityId,
) -> Result<()> {
    if *container_id == entity.id {
        return Err(Error::InvalidInput(
            "An entity cannot contain itself".to_string(),
        ));
    }
    match repo.get(container_id, ReadMode::ExcludeDeleted)? {
        Some(container) if container.owner_id == entity.owner_id => Ok(()),
        Some(_) => Err(Error::InvalidInput(format!(
            "Container {container_id} belongs to another owner"
        ))),
        None => Err(Error::NotFound(format!("container {container_id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteSyncQueue;
    use crate::models::EntityKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> (LocalStore, SharedDatabase) {
        let db = SharedDatabase::open_in_memory().unwrap();
        (LocalStore::new(db.clone(), Arc::new(Notify::new())), db)
    }

    fn owner() -> OwnerId {
        OwnerId::new("owner-1").unwrap()
    }

    fn queued_operations(db: &SharedDatabase) -> Vec<SyncOperation> {
        db.with_connection(|conn| SqliteSyncQueue::new(conn).peek_batch(100))
            .unwrap()
            .into_iter()
            .map(|entry| entry.operation)
            .collect()
    }

    #[test]
    fn save_enqueues_create_then_update() {
        let (store, db) = setup();
        let note = Entity::new(owner(), EntityKind::Note, json!({ "text": "hi" }));

        let created = store.save(&note).unwrap();
        let mut edited = created.clone();
        edited.payload = json!({ "text": "hello" });
        let updated = store.save(&edited).unwrap();

        assert_eq!(created.version, 1);
        assert_eq!(updated.version, 2);
        assert!(updated.updated_at > created.updated_at);
        assert_eq!(
            queued_operations(&db),
            vec![SyncOperation::Create, SyncOperation::Update]
        );
    }

    #[test]
    fn delete_is_idempotent_and_enqueues_once() {
        let (store, db) = setup();
        let note = store
            .save(&Entity::new(owner(), EntityKind::Note, json!({})))
            .unwrap();

        let first = store.delete(&note.id).unwrap();
        let second = store.delete(&note.id).unwrap();

        assert!(first.deleted);
        assert_eq!(first, second);
        assert_eq!(store.get(&note.id).unwrap(), None);
        assert!(store.get_including_deleted(&note.id).unwrap().is_some());
        assert_eq!(
            queued_operations(&db),
            vec![SyncOperation::Create, SyncOperation::Delete]
        );
    }

    #[test]
    fn save_rejects_missing_container_without_enqueueing() {
        let (store, db) = setup();
        let orphan =
            Entity::new(owner(), EntityKind::Note, json!({})).with_container(EntityId::new());

        assert!(matches!(store.save(&orphan), Err(Error::NotFound(_))));
        assert!(queued_operations(&db).is_empty());
        assert_eq!(store.get(&orphan.id).unwrap(), None);
    }

    #[test]
    fn container_listing_hides_deleted_items() {
        let (store, _db) = setup();
        let container = store
            .save(&Entity::new(owner(), EntityKind::TaskContainer, json!({ "title": "Inbox" })))
            .unwrap();
        let kept = store
            .save(&Entity::new(owner(), EntityKind::Note, json!({})).with_container(container.id))
            .unwrap();
        let removed = store
            .save(&Entity::new(owner(), EntityKind::Note, json!({})).with_container(container.id))
            .unwrap();
        store.delete(&removed.id).unwrap();

        let visible = store
            .list_by_container(&container.id, ReadMode::ExcludeDeleted)
            .unwrap();
        assert_eq!(visible.into_iter().map(|e| e.id).collect::<Vec<_>>(), vec![kept.id]);

        let all = store
            .list_by_container(&container.id, ReadMode::IncludeDeleted)
            .unwrap();
        assert_eq!(all.len(), 2);
    }
}
