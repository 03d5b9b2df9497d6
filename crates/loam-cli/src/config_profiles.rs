//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use loam_core::config::SyncSettings;
use loam_core::util::normalize_text_option;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "cli-config.json";

/// Owner used for data created before a profile has an account.
pub const LOCAL_OWNER: &str = "local";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Account owner; unset while the profile is anonymous
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub refresh_endpoint: Option<String>,
    /// Tuning overrides; missing fields use engine defaults
    #[serde(default)]
    pub sync: Option<SyncSettings>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join("loam").join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI config directory".to_string()))
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, CliError> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!("Failed to read config at {}: {error}", path.display()))
        })?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            CliError::Config(format!("Failed to parse config at {}: {error}", path.display()))
        })?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, CliError> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        if let Some(profile) = normalize_profile_name(explicit) {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(std::env::var("LOAM_PROFILE").ok().as_deref())
        {
            return profile;
        }
        if let Some(profile) = normalize_profile_name(self.active_profile.as_deref()) {
            return profile;
        }
        "default".to_string()
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    /// Owner the CLI reads and writes as: the account owner, or the local
    /// anonymous owner until one is configured.
    pub fn effective_owner(&self) -> String {
        normalize_text_option(self.owner_id.clone()).unwrap_or_else(|| LOCAL_OWNER.to_string())
    }

    /// Engine settings: profile values, then `LOAM_*` environment overrides.
    pub fn sync_settings(&self) -> Result<SyncSettings, CliError> {
        let mut settings = self.sync.clone().unwrap_or_default();
        if let Some(url) = normalize_text_option(self.api_base_url.clone()) {
            settings.api_base_url = url;
        }
        let values: BTreeMap<String, String> = std::env::vars().collect();
        Ok(settings.with_overrides(|name| values.get(name).cloned())?)
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.clone());
        self.owner_id = normalize_text_option(self.owner_id.clone());
        self.refresh_endpoint = normalize_text_option(self.refresh_endpoint.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_profile_name_rejects_empty() {
        assert_eq!(normalize_profile_name(None), None);
        assert_eq!(normalize_profile_name(Some(" ")), None);
        assert_eq!(normalize_profile_name(Some(" work ")), Some("work".to_string()));
    }

    #[test]
    fn config_roundtrip_preserves_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = CliProfilesConfig {
            version: 1,
            active_profile: Some("default".to_string()),
            profiles: BTreeMap::new(),
        };
        config.profiles.insert(
            "default".to_string(),
            CliProfile {
                api_base_url: Some(" https://api.example.com ".to_string()),
                owner_id: Some(" user-42 ".to_string()),
                refresh_endpoint: Some("   ".to_string()),
                sync: None,
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();
        let profile = loaded.profile("default").unwrap();
        assert_eq!(profile.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(profile.owner_id.as_deref(), Some("user-42"));
        assert_eq!(profile.refresh_endpoint, None);
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CliProfilesConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, CliProfilesConfig::default());
    }

    #[test]
    fn resolve_profile_name_prefers_explicit_then_active() {
        let config = CliProfilesConfig {
            version: 1,
            active_profile: Some("work".to_string()),
            profiles: BTreeMap::new(),
        };
        assert_eq!(config.resolve_profile_name(Some("mobile")), "mobile");
    }

    #[test]
    fn anonymous_profile_uses_local_owner() {
        assert_eq!(CliProfile::default().effective_owner(), LOCAL_OWNER);
        let account = CliProfile {
            owner_id: Some("user-42".to_string()),
            ..CliProfile::default()
        };
        assert_eq!(account.effective_owner(), "user-42");
    }

    #[test]
    fn profile_partial_sync_settings_keep_defaults() {
        let profile: CliProfile = serde_json::from_str(
            r#"{ "api_base_url": "https://api.example.com", "sync": { "batch_size": 5 } }"#,
        )
        .unwrap();
        let sync = profile.sync.unwrap();
        assert_eq!(sync.batch_size, 5);
        assert_eq!(sync.max_attempts, SyncSettings::default().max_attempts);
    }
}
