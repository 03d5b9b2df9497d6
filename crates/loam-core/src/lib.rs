//! loam-core - Core library for Loam
//!
//! A local-first sync engine: entities live in an embedded `SQLite` store and
//! reach a multi-tenant remote backend through a durable FIFO queue (push),
//! while remote changes are merged back with last-write-wins (pull). A
//! migration service moves an anonymous owner's data into an account.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod migration;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Entity, EntityId, EntityKind, OwnerId};
