//! Bearer credentials for the remote backend and the refresh side-channel.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::util::{compact_text, is_endpoint_url};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("Token refresh is not available for these credentials")]
    RefreshUnavailable,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Auth API error: {0}")]
    Api(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// An access token. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(value: impl Into<String>) -> AuthResult<Self> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Bearer token must not be empty",
            ));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("BearerToken([REDACTED])")
    }
}

/// Source of bearer tokens for remote calls.
///
/// `refresh` is invoked at most once per remote call after a 401/403.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> AuthResult<BearerToken>;

    async fn refresh(&self) -> AuthResult<BearerToken>;
}

/// A fixed token that cannot be refreshed.
#[derive(Clone, Debug)]
pub struct StaticCredentials {
    token: BearerToken,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> AuthResult<Self> {
        Ok(Self {
            token: BearerToken::new(token)?,
        })
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> AuthResult<BearerToken> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> AuthResult<BearerToken> {
        Err(AuthError::RefreshUnavailable)
    }
}

#[derive(Clone, PartialEq, Eq)]
struct TokenPair {
    access_token: BearerToken,
    refresh_token: String,
}

/// Access token plus a refresh token exchanged at `refresh_endpoint`.
///
/// The endpoint receives `{"grantType":"refresh_token","refreshToken":..}`
/// and answers with `{"accessToken":..,"refreshToken":..}`; the refresh token
/// in the answer is optional and replaces the old one when present.
pub struct RefreshingCredentials {
    client: Client,
    refresh_endpoint: String,
    tokens: Mutex<TokenPair>,
}

impl fmt::Debug for RefreshingCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RefreshingCredentials")
            .field("refresh_endpoint", &self.refresh_endpoint)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl RefreshingCredentials {
    pub fn new(
        refresh_endpoint: impl AsRef<str>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        timeout: Duration,
    ) -> AuthResult<Self> {
        let refresh_endpoint = refresh_endpoint.as_ref().trim().to_string();
        if !is_endpoint_url(&refresh_endpoint) {
            return Err(AuthError::InvalidConfiguration(
                "Refresh endpoint must be an http:// or https:// URL with a host",
            ));
        }
        let refresh_token = refresh_token.into().trim().to_string();
        if refresh_token.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            refresh_endpoint,
            tokens: Mutex::new(TokenPair {
                access_token: BearerToken::new(access_token)?,
                refresh_token,
            }),
        })
    }
}

#[async_trait]
impl CredentialProvider for RefreshingCredentials {
    async fn bearer_token(&self) -> AuthResult<BearerToken> {
        Ok(self.tokens.lock().await.access_token.clone())
    }

    async fn refresh(&self) -> AuthResult<BearerToken> {
        let mut tokens = self.tokens.lock().await;
        let response = self
            .client
            .post(&self.refresh_endpoint)
            .json(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token: &tokens.refresh_token,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }

        let payload = response.json::<RefreshResponse>().await?;
        tokens.access_token = BearerToken::new(payload.access_token)?;
        if let Some(refresh_token) = payload.refresh_token.filter(|value| !value.trim().is_empty()) {
            tokens.refresh_token = refresh_token;
        }
        tracing::info!("Refreshed remote access token");
        Ok(tokens.access_token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<String>,
    message: Option<String>,
}

/// Human-readable error for a failed HTTP call, preferring a JSON message.
pub(crate) fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
