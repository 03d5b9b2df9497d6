//! Entity model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for an entity, using UUID v7 (time-sortable).
///
/// Generated on the client and identical on the local and remote copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Create a new unique entity ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Tenant identifier scoping visibility and sync of entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Create an owner id, rejecting blank values.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(Error::InvalidInput("Owner id cannot be empty".to_string()));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OwnerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Kind of user-owned record subject to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Note,
    List,
    TaskContainer,
}

impl EntityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::List => "list",
            Self::TaskContainer => "task_container",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "note" => Ok(Self::Note),
            "list" => Ok(Self::List),
            "task_container" | "task-container" => Ok(Self::TaskContainer),
            other => Err(Error::InvalidInput(format!("Unknown entity kind: {other}"))),
        }
    }
}

/// A user-owned record in the local store and on the remote backend.
///
/// The wire format is camelCase JSON; the same struct is used for queue
/// snapshots so an entry captures the entity exactly as it was at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Client-generated identifier, stable across local and remote
    pub id: EntityId,
    /// Owning tenant; immutable once created (except by migration)
    pub owner_id: OwnerId,
    /// Record kind
    pub kind: EntityKind,
    /// Optional parent grouping reference
    #[serde(default)]
    pub container_id: Option<EntityId>,
    /// Entity-specific fields
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last mutation timestamp (Unix ms), strictly increasing per entity
    pub updated_at: i64,
    /// Mutation counter, +1 per mutation
    pub version: i64,
    /// Soft delete marker
    #[serde(default)]
    pub deleted: bool,
}

impl Entity {
    /// Create an unsaved entity. The store assigns `updated_at` and `version`
    /// when it is first written.
    #[must_use]
    pub fn new(owner_id: OwnerId, kind: EntityKind, payload: serde_json::Value) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: EntityId::new(),
            owner_id,
            kind,
            container_id: None,
            payload,
            created_at: now,
            updated_at: now,
            version: 0,
            deleted: false,
        }
    }

    /// Attach the entity to a parent container.
    #[must_use]
    pub const fn with_container(mut self, container_id: EntityId) -> Self {
        self.container_id = Some(container_id);
        self
    }

    /// Last-write-wins ordering key: timestamp first, version as tie-breaker.
    #[must_use]
    pub const fn precedence(&self) -> (i64, i64) {
        (self.updated_at, self.version)
    }
}

/// Next `updated_at` for an entity, guarding against wall-clock regression.
///
/// Returns `max(now, previous + 1)` so that every mutation of a given entity
/// gets a strictly greater timestamp than the one before it.
#[must_use]
pub fn next_updated_at(previous: Option<i64>, now: i64) -> i64 {
    match previous {
        Some(previous) => now.max(previous.saturating_add(1)),
        None => now,
    }
}
