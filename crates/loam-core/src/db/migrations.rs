//! Database migrations

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        apply(conn, 1, V1_STATEMENTS)?;
    }
    if version < 2 {
        apply(conn, 2, V2_STATEMENTS)?;
    }
    if version < 3 {
        apply(conn, 3, V3_STATEMENTS)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

fn apply(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        params![version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: entities, the sync queue and the key/value meta namespace
const V1_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        container_id TEXT,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        version INTEGER NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_entities_owner ON entities(owner_id, is_deleted)",
    "CREATE INDEX IF NOT EXISTS idx_entities_container ON entities(container_id, is_deleted)",
    "CREATE INDEX IF NOT EXISTS idx_entities_updated ON entities(updated_at DESC)",
    "CREATE TABLE IF NOT EXISTS sync_queue (
        entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        payload_snapshot TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        state TEXT NOT NULL DEFAULT 'pending'
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_state ON sync_queue(state, entry_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_id)",
    "CREATE TABLE IF NOT EXISTS sync_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// Version 2: LWW conflict logging
const V2_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id TEXT NOT NULL,
        winner TEXT NOT NULL,
        local_updated_at INTEGER NOT NULL,
        local_version INTEGER NOT NULL,
        incoming_updated_at INTEGER NOT NULL,
        incoming_version INTEGER NOT NULL,
        resolved_at INTEGER NOT NULL,
        strategy TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity_id ON sync_conflicts(entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
];

/// Version 3: per-owner migration upload ledger
const V3_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sync_migration_uploads (
        source_owner TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        uploaded_at INTEGER NOT NULL,
        PRIMARY KEY (source_owner, entity_id)
    )",
];
