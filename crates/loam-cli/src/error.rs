use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] loam_core::Error),
    #[error(transparent)]
    Sync(#[from] loam_core::sync::SyncError),
    #[error(transparent)]
    Remote(#[from] loam_core::remote::RemoteError),
    #[error(transparent)]
    Auth(#[from] loam_core::auth::AuthError),
    #[error(transparent)]
    Settings(#[from] loam_core::config::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No content provided")]
    EmptyContent,
    #[error("Edited content cannot be empty")]
    EmptyEditedContent,
    #[error("Entity ID cannot be empty")]
    EmptyEntityId,
    #[error("Entity not found for id/prefix: {0}")]
    EntityNotFound(String),
    #[error("{0}")]
    AmbiguousEntityId(String),
    #[error("Dead-letter entry not found: {0}")]
    DeadLetterNotFound(i64),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error(
        "Sync is not configured. Run `loam config init --owner-id <OWNER>` and set LOAM_ACCESS_TOKEN."
    )]
    SyncNotConfigured,
}
