//! HTTP/JSON client for the remote entity endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};

use crate::auth::{parse_api_error, CredentialProvider};
use crate::config::SyncSettings;
use crate::models::{Entity, OwnerId, SyncOperation, SyncQueueEntry};
use crate::util::{is_endpoint_url, normalize_text_option};

use super::{RemoteBackend, RemoteError};

/// Bearer-authenticated client for `POST /entities`, `PATCH /entities/{id}`
/// and `GET /entities`.
#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl std::fmt::Debug for HttpRemoteClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteClient")
            .field("base_url", &self.base_url)
            .field("credentials", &"[REDACTED]")
            .finish()
    }
}

impl HttpRemoteClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| RemoteError::InvalidConfiguration(error.to_string()))?;
        Ok(Self {
            base_url,
            client,
            credentials,
        })
    }

    pub fn from_settings(
        settings: &SyncSettings,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, RemoteError> {
        Self::new(
            settings.api_base_url.clone(),
            credentials,
            settings.request_timeout(),
        )
    }

    fn entities_url(&self) -> String {
        format!("{}/entities", self.base_url)
    }

    fn entity_url(&self, entity: &Entity) -> String {
        format!("{}/entities/{}", self.base_url, entity.id)
    }

    /// Send a request built by `build`, refreshing credentials once on 401/403.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, RemoteError>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let token = self
            .credentials
            .bearer_token()
            .await
            .map_err(|error| RemoteError::AuthExpired(error.to_string()))?;
        let response = build(token.expose())
            .send()
            .await
            .map_err(classify_transport_error)?;
        if !is_auth_failure(response.status()) {
            return expect_success(response).await;
        }

        tracing::info!(
            status = response.status().as_u16(),
            "Remote rejected credentials; refreshing once"
        );
        let token = match self.credentials.refresh().await {
            Ok(token) => token,
            Err(error) => {
                tracing::warn!("Credential refresh failed: {error}");
                return Err(RemoteError::AuthExpired(error.to_string()));
            }
        };

        let response = build(token.expose())
            .send()
            .await
            .map_err(classify_transport_error)?;
        expect_success(response).await
    }

    async fn send_entity(&self, entity: &Entity, operation: SyncOperation) -> Result<(), RemoteError> {
        let url = match operation {
            SyncOperation::Create => self.entities_url(),
            SyncOperation::Update | SyncOperation::Delete => self.entity_url(entity),
        };
        self.send_authorized(|token| {
            let request = match operation {
                SyncOperation::Create => self.client.post(&url),
                SyncOperation::Update | SyncOperation::Delete => self.client.patch(&url),
            };
            request
                .bearer_auth(token)
                .header("Accept", "application/json")
                .json(entity)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for HttpRemoteClient {
    async fn push(&self, entry: &SyncQueueEntry) -> Result<(), RemoteError> {
        self.send_entity(&entry.payload_snapshot, entry.operation)
            .await
    }

    async fn create(&self, entity: &Entity) -> Result<(), RemoteError> {
        self.send_entity(entity, SyncOperation::Create).await
    }

    async fn pull_since(&self, owner: &OwnerId, since: i64) -> Result<Vec<Entity>, RemoteError> {
        let url = self.entities_url();
        let since = since.to_string();
        let response = self
            .send_authorized(|token| {
                self.client
                    .get(&url)
                    .bearer_auth(token)
                    .header("Accept", "application/json")
                    .query(&[
                        ("owner", owner.as_str()),
                        ("updatedAfter", since.as_str()),
                        ("includeDeleted", "true"),
                    ])
            })
            .await?;

        let entities = response
            .json::<Vec<Entity>>()
            .await
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        if let Some(foreign) = entities.iter().find(|entity| entity.owner_id != *owner) {
            return Err(RemoteError::InvalidPayload(format!(
                "entity {} belongs to another owner",
                foreign.id
            )));
        }
        Ok(entities)
    }
}

const fn is_auth_failure(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

async fn expect_success(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &body))
}

fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        RemoteError::TransientNetwork(message)
    } else if is_auth_failure(status) {
        RemoteError::AuthExpired(message)
    } else {
        RemoteError::Validation {
            status: status.as_u16(),
            message,
        }
    }
}

fn classify_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_builder() {
        RemoteError::InvalidConfiguration(error.to_string())
    } else if error.is_decode() {
        RemoteError::InvalidPayload(error.to_string())
    } else {
        RemoteError::TransientNetwork(error.to_string())
    }
}

fn normalize_base_url(raw: String) -> Result<String, RemoteError> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_endpoint_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "base URL must be an http:// or https:// URL with a host".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{RefreshingCredentials, StaticCredentials};
    use crate::models::{EntityKind, QueueEntryState};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn owner() -> OwnerId {
        OwnerId::new("owner-1").unwrap()
    }

    fn client(server: &MockServer) -> HttpRemoteClient {
        HttpRemoteClient::new(
            format!("{}/", server.uri()),
            Arc::new(StaticCredentials::new("access-1").unwrap()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn entry(operation: SyncOperation) -> SyncQueueEntry {
        let mut entity = Entity::new(owner(), EntityKind::Note, json!({ "text": "hi" }));
        entity.version = 1;
        entity.deleted = matches!(operation, SyncOperation::Delete);
        SyncQueueEntry {
            entry_id: 1,
            operation,
            entity_type: entity.kind,
            entity_id: entity.id,
            payload_snapshot: entity,
            enqueued_at: 0,
            attempt_count: 0,
            last_error: None,
            state: QueueEntryState::Pending,
        }
    }

    #[test]
    fn normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url(" https://api.example.com/ ".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            RemoteError::TransientNetwork(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            RemoteError::TransientNetwork(_)
        ));
        assert_eq!(
            classify_status(StatusCode::CONFLICT, "exists"),
            RemoteError::Validation {
                status: 409,
                message: "exists (409)".to_string()
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_posts_snapshot_with_bearer() {
        let server = MockServer::start().await;
        let entry = entry(SyncOperation::Create);
        Mock::given(method("POST"))
            .and(path("/entities"))
            .and(header("Authorization", "Bearer access-1"))
            .and(body_partial_json(json!({
                "id": entry.entity_id.as_str(),
                "ownerId": "owner-1",
                "version": 1
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).push(&entry).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_patches_with_deleted_flag() {
        let server = MockServer::start().await;
        let entry = entry(SyncOperation::Delete);
        Mock::given(method("PATCH"))
            .and(path(format!("/entities/{}", entry.entity_id)))
            .and(body_partial_json(json!({ "deleted": true })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).push(&entry).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_errors_are_transient_and_validation_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({ "error": "missing container" })),
            )
            .mount(&server)
            .await;

        let client = client(&server);
        let error = client.push(&entry(SyncOperation::Create)).await.unwrap_err();
        assert_eq!(error, RemoteError::TransientNetwork("HTTP 503".to_string()));

        let error = client.push(&entry(SyncOperation::Update)).await.unwrap_err();
        assert_eq!(
            error,
            RemoteError::Validation {
                status: 422,
                message: "missing container (422)".to_string()
            }
        );
        assert!(error.is_permanent());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unauthorized_refreshes_once_then_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/entities"))
            .and(header("Authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/entities"))
            .and(header("Authorization", "Bearer access-2"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "access-2" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let credentials = RefreshingCredentials::new(
            format!("{}/auth/refresh", server.uri()),
            "access-1",
            "refresh-1",
            Duration::from_secs(5),
        )
        .unwrap();
        let client =
            HttpRemoteClient::new(server.uri(), Arc::new(credentials), Duration::from_secs(5))
                .unwrap();

        client.push(&entry(SyncOperation::Create)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unauthorized_without_refresh_is_retryable_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let error = client(&server)
            .push(&entry(SyncOperation::Create))
            .await
            .unwrap_err();
        assert!(matches!(error, RemoteError::AuthExpired(_)));
        assert!(!error.is_permanent());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_since_sends_filters_and_decodes_entities() {
        let server = MockServer::start().await;
        let mut remote = Entity::new(owner(), EntityKind::List, json!({ "title": "groceries" }));
        remote.updated_at = 1_500;
        remote.version = 3;
        remote.deleted = true;

        Mock::given(method("GET"))
            .and(path("/entities"))
            .and(query_param("owner", "owner-1"))
            .and(query_param("updatedAfter", "1000"))
            .and(query_param("includeDeleted", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([remote])))
            .expect(1)
            .mount(&server)
            .await;

        let pulled = client(&server).pull_since(&owner(), 1_000).await.unwrap();
        assert_eq!(pulled, vec![remote]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pull_rejects_foreign_rows() {
        let server = MockServer::start().await;
        let foreign = Entity::new(
            OwnerId::new("someone-else").unwrap(),
            EntityKind::Note,
            json!({}),
        );
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([foreign])))
            .mount(&server)
            .await;

        let error = client(&server).pull_since(&owner(), 0).await.unwrap_err();
        assert!(matches!(error, RemoteError::InvalidPayload(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connection_errors_are_transient() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let client = HttpRemoteClient::new(
            uri,
            Arc::new(StaticCredentials::new("access-1").unwrap()),
            Duration::from_secs(2),
        )
        .unwrap();
        let error = client.pull_since(&owner(), 0).await.unwrap_err();
        assert!(matches!(error, RemoteError::TransientNetwork(_)));
    }
}
