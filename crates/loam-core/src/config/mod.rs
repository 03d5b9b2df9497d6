//! Sync engine settings.
//!
//! `SyncSettings` is shared by the CLI and any embedding app. Values come from
//! serialized profiles (all fields optional, defaults filled in) and may be
//! overridden by `LOAM_*` environment variables.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{is_endpoint_url, normalize_text_option};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for the push, pull and migration workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Base URL of the remote entity API (no trailing slash)
    pub api_base_url: String,
    /// Queue entries taken per `peek_batch`
    pub batch_size: usize,
    /// Failed attempts before an entry is dead-lettered
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Periodic pull interval
    pub pull_interval_secs: u64,
    /// Entities uploaded per migration batch
    pub migration_batch_size: usize,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            batch_size: 50,
            max_attempts: 10,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
            pull_interval_secs: 300,
            migration_batch_size: 25,
            request_timeout_secs: 30,
        }
    }
}

impl SyncSettings {
    /// Defaults overridden by `LOAM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::default().with_overrides(|name| values.get(name).cloned())
    }

    /// Apply `LOAM_*` overrides from `lookup` on top of `self`, then validate.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = normalize_text_option(lookup("LOAM_API_BASE_URL")) {
            self.api_base_url = url;
        }
        override_number(&lookup, "LOAM_SYNC_BATCH_SIZE", &mut self.batch_size)?;
        override_number(&lookup, "LOAM_SYNC_MAX_ATTEMPTS", &mut self.max_attempts)?;
        override_number(&lookup, "LOAM_SYNC_BACKOFF_BASE_MS", &mut self.backoff_base_ms)?;
        override_number(&lookup, "LOAM_SYNC_BACKOFF_CAP_MS", &mut self.backoff_cap_ms)?;
        override_number(&lookup, "LOAM_SYNC_PULL_INTERVAL_SECS", &mut self.pull_interval_secs)?;
        override_number(
            &lookup,
            "LOAM_MIGRATION_BATCH_SIZE",
            &mut self.migration_batch_size,
        )?;
        override_number(
            &lookup,
            "LOAM_REQUEST_TIMEOUT_SECS",
            &mut self.request_timeout_secs,
        )?;

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_endpoint_url(&self.api_base_url) {
            return Err(ConfigError::Invalid(
                "api_base_url must be an http:// or https:// URL with a host".to_string(),
            ));
        }
        if self.batch_size == 0 || self.migration_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch sizes must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.backoff_base_ms == 0 || self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "backoff_base_ms must be positive and not exceed backoff_cap_ms".to_string(),
            ));
        }
        if self.pull_interval_secs == 0 || self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "intervals and timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without trailing slashes.
    #[must_use]
    pub fn normalized_base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    #[must_use]
    pub const fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn override_number<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    let Some(raw) = normalize_text_option(lookup(name)) else {
        return Ok(());
    };
    *target = raw
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{name} must be a non-negative integer")))?;
    Ok(())
}
