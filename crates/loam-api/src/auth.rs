use std::collections::HashMap;
use std::sync::Arc;

use axum::http::HeaderMap;
use loam_core::OwnerId;

use crate::config::AppConfig;
use crate::error::AppError;

/// Tenant resolved from the request's bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedOwner {
    pub owner_id: OwnerId,
}

/// Static token table loaded from configuration.
#[derive(Clone)]
pub struct TokenVerifier {
    tokens: Arc<HashMap<String, OwnerId>>,
}

impl TokenVerifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            tokens: Arc::new(config.tokens.clone()),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthenticatedOwner, AppError> {
        self.tokens
            .get(token)
            .map(|owner_id| AuthenticatedOwner {
                owner_id: owner_id.clone(),
            })
            .ok_or_else(|| AppError::unauthorized("Bearer token is not recognized"))
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn verifier() -> TokenVerifier {
        let mut tokens = HashMap::new();
        tokens.insert("alpha".to_string(), OwnerId::new("user-a").unwrap());
        TokenVerifier::new(&AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            tokens,
        })
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("bearer  alpha "));
        assert_eq!(extract_bearer_token(&headers).unwrap(), "alpha");
    }

    #[test]
    fn non_bearer_headers_are_rejected() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            extract_bearer_token(&headers),
            Err(AppError::Unauthorized(_))
        ));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(matches!(
            extract_bearer_token(&headers),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn known_tokens_map_to_owners() {
        let verifier = verifier();
        assert_eq!(verifier.verify("alpha").unwrap().owner_id.as_str(), "user-a");
        assert!(matches!(
            verifier.verify("beta"),
            Err(AppError::Unauthorized(_))
        ));
    }
}
