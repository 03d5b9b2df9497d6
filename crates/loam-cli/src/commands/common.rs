use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use loam_core::auth::{CredentialProvider, RefreshingCredentials, StaticCredentials};
use loam_core::config::SyncSettings;
use loam_core::db::ReadMode;
use loam_core::models::{SyncConflict, SyncQueueEntry};
use loam_core::remote::{HttpRemoteClient, RemoteBackend};
use loam_core::services::{LocalStore, SharedDatabase};
use loam_core::sync::SyncContext;
use loam_core::util::normalize_text_option;
use loam_core::{Entity, EntityId, EntityKind, OwnerId};
use serde::Serialize;
use serde_json::Value;

use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

/// Resolved profile for one CLI invocation.
#[derive(Debug, Clone)]
pub struct Session {
    pub profile_name: String,
    pub profile: CliProfile,
    pub owner: OwnerId,
    pub settings: SyncSettings,
}

impl Session {
    pub fn load(global_profile: Option<&str>) -> Result<Self, CliError> {
        let config = CliProfilesConfig::load()?;
        Self::from_config(&config, global_profile)
    }

    pub fn from_config(
        config: &CliProfilesConfig,
        global_profile: Option<&str>,
    ) -> Result<Self, CliError> {
        let profile_name = config.resolve_profile_name(global_profile);
        let profile = config.profile(&profile_name).cloned().unwrap_or_default();
        let owner = OwnerId::new(profile.effective_owner())?;
        let settings = profile.sync_settings()?;
        Ok(Self {
            profile_name,
            profile,
            owner,
            settings,
        })
    }

    /// Whether the profile has an account owner to sync as.
    pub fn has_account(&self) -> bool {
        normalize_text_option(self.profile.owner_id.clone()).is_some()
    }

    pub fn context(&self, db: SharedDatabase) -> SyncContext {
        SyncContext::always_online(db, self.owner.clone(), self.settings.clone())
    }

    /// HTTP remote authenticated with `LOAM_ACCESS_TOKEN`. When
    /// `LOAM_REFRESH_TOKEN` and a refresh endpoint are configured, expired
    /// tokens are refreshed once per rejected request.
    pub fn remote(&self) -> Result<Arc<dyn RemoteBackend>, CliError> {
        if !self.has_account() {
            return Err(CliError::SyncNotConfigured);
        }
        let Some(access_token) = normalize_text_option(env::var("LOAM_ACCESS_TOKEN").ok()) else {
            return Err(CliError::SyncNotConfigured);
        };
        let refresh_token = normalize_text_option(env::var("LOAM_REFRESH_TOKEN").ok());

        let credentials: Arc<dyn CredentialProvider> =
            match (self.profile.refresh_endpoint.as_deref(), refresh_token) {
                (Some(endpoint), Some(refresh_token)) => Arc::new(RefreshingCredentials::new(
                    endpoint,
                    access_token,
                    refresh_token,
                    self.settings.request_timeout(),
                )?),
                _ => Arc::new(StaticCredentials::new(access_token)?),
            };

        let client = HttpRemoteClient::from_settings(&self.settings, credentials)?;
        tracing::debug!(profile = %self.profile_name, owner = %self.owner, "Remote client ready");
        Ok(Arc::new(client))
    }
}

#[derive(Debug, Serialize)]
pub struct EntityListItem {
    pub id: String,
    pub kind: String,
    pub container_id: Option<String>,
    pub preview: String,
    pub payload: Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
    pub deleted: bool,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub entity_id: String,
    pub winner: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterItem {
    pub entry_id: i64,
    pub entity_id: String,
    pub operation: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub enqueued_at: i64,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("LOAM_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("loam").join("loam.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub fn open_database(path: &Path) -> Result<SharedDatabase, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SharedDatabase::open_path(path)?)
}

/// Find a live entity of `owner` by full id or unique id prefix.
pub fn resolve_entity(
    store: &LocalStore,
    owner: &OwnerId,
    query: &str,
) -> Result<Entity, CliError> {
    if let Ok(entity_id) = query.parse::<EntityId>() {
        if let Some(entity) = store.get(&entity_id)? {
            if entity.owner_id == *owner {
                return Ok(entity);
            }
        }
    }

    let mut matching = store
        .list_by_owner(owner, ReadMode::ExcludeDeleted)?
        .into_iter()
        .filter(|entity| entity.id.as_str().starts_with(query))
        .collect::<Vec<_>>();

    match matching.len() {
        0 => Err(CliError::EntityNotFound(query.to_string())),
        1 => Ok(matching.remove(0)),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|entity| short_id(&entity.id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousEntityId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

/// Payload field holding the user text for a kind.
pub const fn text_field(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Note => "text",
        EntityKind::List | EntityKind::TaskContainer => "title",
    }
}

pub fn payload_for(kind: EntityKind, text: &str) -> Value {
    let mut payload = serde_json::Map::new();
    payload.insert(text_field(kind).to_string(), Value::String(text.to_string()));
    Value::Object(payload)
}

/// Replace the text field, keeping any other payload fields.
pub fn with_text(entity: &Entity, text: &str) -> Value {
    let mut payload = match &entity.payload {
        Value::Object(fields) => fields.clone(),
        _ => serde_json::Map::new(),
    };
    payload.insert(
        text_field(entity.kind).to_string(),
        Value::String(text.to_string()),
    );
    Value::Object(payload)
}

pub fn entity_text(entity: &Entity) -> String {
    match entity.payload.get(text_field(entity.kind)) {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

pub fn short_id(id: &EntityId) -> String {
    id.as_str().chars().take(13).collect()
}

pub fn format_entity_lines(entities: &[Entity]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    entities
        .iter()
        .map(|entity| {
            let preview = entity_preview(entity, 40);
            let relative_time = format_relative_time(entity.updated_at, now_ms);
            let marker = if entity.deleted { "  (deleted)" } else { "" };
            format!(
                "{:<13}  {:<14}  {preview:<40}  {relative_time}{marker}",
                short_id(&entity.id),
                entity.kind.as_str(),
            )
        })
        .collect()
}

pub fn entity_to_list_item(entity: &Entity) -> EntityListItem {
    let now_ms = Utc::now().timestamp_millis();
    EntityListItem {
        id: entity.id.as_str(),
        kind: entity.kind.to_string(),
        container_id: entity.container_id.map(|id| id.as_str()),
        preview: entity_preview(entity, 80),
        payload: entity.payload.clone(),
        created_at: entity.created_at,
        updated_at: entity.updated_at,
        version: entity.version,
        deleted: entity.deleted,
        relative_time: format_relative_time(entity.updated_at, now_ms),
    }
}

pub fn entity_preview(entity: &Entity, max_chars: usize) -> String {
    let text = entity_text(entity);
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        entity_id: conflict.entity_id.clone(),
        winner: conflict.winner.as_str().to_string(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  {:<6}  entity={}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.winner.as_str(),
                conflict.entity_id,
                conflict.local_updated_at,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn dead_letter_to_item(entry: &SyncQueueEntry) -> DeadLetterItem {
    DeadLetterItem {
        entry_id: entry.entry_id,
        entity_id: entry.entity_id.as_str(),
        operation: entry.operation.to_string(),
        attempt_count: entry.attempt_count,
        last_error: entry.last_error.clone(),
        enqueued_at: entry.enqueued_at,
    }
}

pub fn format_dead_letter_lines(entries: &[SyncQueueEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            format!(
                "#{:<6}  {:<6}  entity={}  attempts={}  {}",
                entry.entry_id,
                entry.operation.as_str(),
                short_id(&entry.entity_id),
                entry.attempt_count,
                entry.last_error.as_deref().unwrap_or("")
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn resolve_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    if let Some(content) = capture_editor_input_with_initial("")? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_entity_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyEntityId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn capture_editor_input_with_initial(
    initial_content: &str,
) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let content = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_content(&content))
}

pub fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(CliError::EditorFailed(format!(
            "`{editor}` exited with status {status}"
        ))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let status = Command::new(program).args(parts).arg(file_path).status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

pub fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("loam-edit-{}-{now}.md", std::process::id()))
}
