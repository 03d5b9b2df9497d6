//! Shared helpers for engine and migration tests: an in-memory remote backend
//! that can be scripted to fail.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use loam_core::config::SyncSettings;
use loam_core::models::{Entity, EntityId, EntityKind, OwnerId, SyncOperation, SyncQueueEntry};
use loam_core::remote::{Backoff, RemoteBackend, RemoteError};
use loam_core::services::SharedDatabase;
use loam_core::sync::{SyncContext, SyncEngine};

/// One call observed by the fake, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: &'static str,
    pub entity_id: EntityId,
}

#[derive(Default)]
struct FakeState {
    entities: BTreeMap<EntityId, Entity>,
    calls: Vec<Call>,
    /// Failures returned by the next push/create calls, whatever the entity
    next_failures: VecDeque<RemoteError>,
    /// Failures returned for a specific entity
    entity_failures: HashMap<EntityId, VecDeque<RemoteError>>,
    /// Responses returned by `pull_since` instead of filtering the store
    scripted_pulls: VecDeque<Vec<Entity>>,
    /// Failures returned by the next `pull_since` calls
    pull_failures: VecDeque<RemoteError>,
}

/// In-memory remote enforcing the same referential rule as the real backend:
/// an entity whose container does not exist is rejected with 422.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: usize, error: RemoteError) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            state.next_failures.push_back(error.clone());
        }
    }

    pub fn fail_entity(&self, entity_id: EntityId, count: usize, error: RemoteError) {
        let mut state = self.state.lock().unwrap();
        let failures = state.entity_failures.entry(entity_id).or_default();
        for _ in 0..count {
            failures.push_back(error.clone());
        }
    }

    /// Write made by another device.
    pub fn insert_remote(&self, entity: Entity) {
        self.state
            .lock()
            .unwrap()
            .entities
            .insert(entity.id, entity);
    }

    pub fn fail_next_pull(&self, error: RemoteError) {
        self.state.lock().unwrap().pull_failures.push_back(error);
    }

    pub fn script_pull(&self, response: Vec<Entity>) {
        self.state.lock().unwrap().scripted_pulls.push_back(response);
    }

    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        self.state.lock().unwrap().entities.get(id).cloned()
    }

    pub fn entities_for(&self, owner: &OwnerId) -> Vec<Entity> {
        self.state
            .lock()
            .unwrap()
            .entities
            .values()
            .filter(|entity| entity.owner_id == *owner)
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn write(&self, verb: &'static str, entity: &Entity) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call {
            verb,
            entity_id: entity.id,
        });

        if let Some(error) = state.next_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = state
            .entity_failures
            .get_mut(&entity.id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if let Some(container_id) = entity.container_id {
            if !state.entities.contains_key(&container_id) {
                return Err(RemoteError::Validation {
                    status: 422,
                    message: format!("container {container_id} does not exist"),
                });
            }
        }
        if verb == "PATCH" && !state.entities.contains_key(&entity.id) {
            return Err(RemoteError::Validation {
                status: 404,
                message: format!("entity {} not found", entity.id),
            });
        }

        state.entities.insert(entity.id, entity.clone());
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for FakeRemote {
    async fn push(&self, entry: &SyncQueueEntry) -> Result<(), RemoteError> {
        let verb = match entry.operation {
            SyncOperation::Create => "POST",
            SyncOperation::Update | SyncOperation::Delete => "PATCH",
        };
        self.write(verb, &entry.payload_snapshot)
    }

    async fn create(&self, entity: &Entity) -> Result<(), RemoteError> {
        self.write("POST", entity)
    }

    async fn pull_since(&self, owner: &OwnerId, since: i64) -> Result<Vec<Entity>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.pull_failures.pop_front() {
            return Err(error);
        }
        if let Some(scripted) = state.scripted_pulls.pop_front() {
            return Ok(scripted);
        }
        Ok(state
            .entities
            .values()
            .filter(|entity| entity.owner_id == *owner && entity.updated_at > since)
            .cloned()
            .collect())
    }
}

pub fn owner(name: &str) -> OwnerId {
    OwnerId::new(name).unwrap()
}

pub fn note(owner: &OwnerId, text: &str) -> Entity {
    Entity::new(owner.clone(), EntityKind::Note, json!({ "text": text }))
}

pub fn transient() -> RemoteError {
    RemoteError::TransientNetwork("HTTP 503".to_string())
}

pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        backoff_base_ms: 1,
        backoff_cap_ms: 4,
        ..SyncSettings::default()
    }
}

pub fn context_for(owner: &OwnerId) -> SyncContext {
    let db = SharedDatabase::open_in_memory().unwrap();
    SyncContext::always_online(db, owner.clone(), fast_settings())
}

pub fn engine_for(context: &SyncContext, remote: &FakeRemote) -> SyncEngine {
    SyncEngine::new(context.clone(), Arc::new(remote.clone())).with_backoff(Backoff::new(1, 4))
}
