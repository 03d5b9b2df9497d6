use std::collections::HashMap;
use std::env;
use std::fmt;

use loam_core::OwnerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Bearer token -> owning tenant
    pub tokens: HashMap<String, OwnerId>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut owners = self
            .tokens
            .values()
            .map(OwnerId::as_str)
            .collect::<Vec<_>>();
        owners.sort_unstable();
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("tokens", &"[REDACTED]")
            .field("owners", &owners)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "LOAM_API_BIND_ADDR", DEFAULT_BIND_ADDR);
        let raw_tokens = required_trimmed(&lookup, "LOAM_API_TOKENS")?;
        let tokens = parse_token_map(&raw_tokens)?;

        Ok(Self { bind_addr, tokens })
    }
}

/// Parse `token=owner` pairs separated by commas.
fn parse_token_map(raw: &str) -> Result<HashMap<String, OwnerId>, ConfigError> {
    let mut tokens = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (token, owner) = pair.split_once('=').ok_or_else(|| {
            ConfigError::Invalid("LOAM_API_TOKENS entries must be `token=owner`".to_string())
        })?;
        let token = token.trim();
        if token.is_empty() {
            return Err(ConfigError::Invalid(
                "LOAM_API_TOKENS contains an empty token".to_string(),
            ));
        }
        let owner = OwnerId::new(owner.trim()).map_err(|error| {
            ConfigError::Invalid(format!("LOAM_API_TOKENS has an invalid owner: {error}"))
        })?;
        if tokens.insert(token.to_string(), owner).is_some() {
            return Err(ConfigError::Invalid(
                "LOAM_API_TOKENS contains a duplicate token".to_string(),
            ));
        }
    }

    if tokens.is_empty() {
        return Err(ConfigError::MissingVar("LOAM_API_TOKENS"));
    }
    Ok(tokens)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
