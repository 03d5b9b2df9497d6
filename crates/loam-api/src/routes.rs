use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch};
use axum::{Extension, Json, Router};
use chrono::Utc;
use loam_core::{Entity, EntityId, OwnerId};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedOwner, TokenVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::store::{EntityStore, WriteMode, WriteOutcome};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    verifier: TokenVerifier,
    store: EntityStore,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        Self {
            verifier: TokenVerifier::new(&config),
            store: EntityStore::new(),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/entities", get(list_entities).post(create_entity))
        .route("/entities/{id}", patch(update_entity))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    entities: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        entities: state.store.len().await,
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let owner = state.verifier.verify(token)?;
    request.extensions_mut().insert(owner);
    Ok(next.run(request).await)
}

async fn create_entity(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedOwner>,
    Json(entity): Json<Entity>,
) -> Result<(StatusCode, Json<Entity>), AppError> {
    let outcome = state
        .store
        .write(&caller.owner_id, entity, WriteMode::Upsert)
        .await?;
    log_write("create", &caller, &outcome);

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.entity)))
}

async fn update_entity(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedOwner>,
    Path(id): Path<String>,
    Json(entity): Json<Entity>,
) -> Result<Json<Entity>, AppError> {
    let id = id
        .parse::<EntityId>()
        .map_err(|_| AppError::bad_request(format!("`{id}` is not a valid entity id")))?;
    if entity.id != id {
        return Err(AppError::bad_request(format!(
            "path id {id} does not match body id {}",
            entity.id
        )));
    }

    let outcome = state
        .store
        .write(&caller.owner_id, entity, WriteMode::Update)
        .await?;
    log_write("update", &caller, &outcome);
    Ok(Json(outcome.entity))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    owner: Option<String>,
    #[serde(default)]
    updated_after: i64,
    #[serde(default)]
    include_deleted: bool,
}

async fn list_entities(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedOwner>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Entity>>, AppError> {
    if let Some(owner) = query.owner.as_deref() {
        let owner = OwnerId::new(owner).map_err(|error| AppError::bad_request(error.to_string()))?;
        if owner != caller.owner_id {
            return Err(AppError::forbidden(
                "cannot read entities of another tenant",
            ));
        }
    }

    let entities = state
        .store
        .changed_since(&caller.owner_id, query.updated_after, query.include_deleted)
        .await;
    tracing::info!(
        endpoint = "list_entities",
        owner = %caller.owner_id,
        since = query.updated_after,
        returned = entities.len(),
        "Served entity changes"
    );
    Ok(Json(entities))
}

fn log_write(endpoint: &'static str, caller: &AuthenticatedOwner, outcome: &WriteOutcome) {
    tracing::info!(
        endpoint,
        owner = %caller.owner_id,
        entity_id = %outcome.entity.id,
        version = outcome.entity.version,
        created = outcome.created,
        applied = outcome.applied,
        "Stored entity"
    );
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use http_body_util::BodyExt;
    use loam_core::EntityKind;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    fn router() -> Router {
        let mut tokens = HashMap::new();
        tokens.insert("alpha".to_string(), OwnerId::new("user-a").unwrap());
        tokens.insert("beta".to_string(), OwnerId::new("user-b").unwrap());
        let config = Arc::new(AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            tokens,
        });
        app_router(AppState::from_config(config))
    }

    fn owner_a() -> OwnerId {
        OwnerId::new("user-a").unwrap()
    }

    fn note(owner_id: OwnerId, updated_at: i64) -> Entity {
        let mut entity = Entity::new(owner_id, EntityKind::Note, json!({ "text": "hi" }));
        entity.updated_at = updated_at;
        entity.version = 1;
        entity
    }

    fn request(method: Method, uri: &str, token: Option<&str>, body: Option<&Entity>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(entity) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(entity).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn healthz_is_public() {
        let (status, body) = send(&router(), request(Method::GET, "/healthz", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn entity_routes_require_known_token() {
        let router = router();
        let (status, _) = send(&router, request(Method::GET, "/entities", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            send(&router, request(Method::GET, "/entities", Some("gamma"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("not recognized"));
    }

    #[tokio::test]
    async fn create_then_pull_returns_entity() {
        let router = router();
        let entity = note(owner_a(), 1_000);

        let (status, body) = send(
            &router,
            request(Method::POST, "/entities", Some("alpha"), Some(&entity)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], entity.id.to_string());

        // Replaying the same create is accepted.
        let (status, _) = send(
            &router,
            request(Method::POST, "/entities", Some("alpha"), Some(&entity)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &router,
            request(
                Method::GET,
                "/entities?owner=user-a&updatedAfter=999&includeDeleted=true",
                Some("alpha"),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let pulled: Vec<Entity> = serde_json::from_value(body).unwrap();
        assert_eq!(pulled, vec![entity]);

        let (_, body) = send(
            &router,
            request(Method::GET, "/entities?updatedAfter=1000", Some("alpha"), None),
        )
        .await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn deleted_entities_are_only_listed_on_request() {
        let router = router();
        let mut entity = note(owner_a(), 1_000);
        send(
            &router,
            request(Method::POST, "/entities", Some("alpha"), Some(&entity)),
        )
        .await;
        entity.deleted = true;
        entity.updated_at = 2_000;
        entity.version = 2;
        let uri = format!("/entities/{}", entity.id);
        let (status, _) = send(
            &router,
            request(Method::PATCH, &uri, Some("alpha"), Some(&entity)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&router, request(Method::GET, "/entities", Some("alpha"), None)).await;
        assert_eq!(body, json!([]));

        let (_, body) = send(
            &router,
            request(Method::GET, "/entities?includeDeleted=true", Some("alpha"), None),
        )
        .await;
        assert_eq!(body[0]["deleted"], true);
    }

    #[tokio::test]
    async fn patch_of_unknown_entity_is_not_found() {
        let router = router();
        let entity = note(owner_a(), 1_000);
        let uri = format!("/entities/{}", entity.id);
        let (status, _) = send(
            &router,
            request(Method::PATCH, &uri, Some("alpha"), Some(&entity)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_path_must_match_body() {
        let router = router();
        let entity = note(owner_a(), 1_000);
        let (status, _) = send(
            &router,
            request(Method::PATCH, "/entities/not-a-uuid", Some("alpha"), Some(&entity)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let other = EntityId::new();
        let uri = format!("/entities/{other}");
        let (status, _) = send(
            &router,
            request(Method::PATCH, &uri, Some("alpha"), Some(&entity)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_container_is_unprocessable() {
        let router = router();
        let item = note(owner_a(), 1_000).with_container(EntityId::new());
        let (status, body) = send(
            &router,
            request(Method::POST, "/entities", Some("alpha"), Some(&item)),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("container"));

        let mut container = Entity::new(owner_a(), EntityKind::TaskContainer, json!({ "title": "Inbox" }));
        container.id = item.container_id.unwrap();
        container.version = 1;
        send(
            &router,
            request(Method::POST, "/entities", Some("alpha"), Some(&container)),
        )
        .await;
        let (status, _) = send(
            &router,
            request(Method::POST, "/entities", Some("alpha"), Some(&item)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let router = router();
        let entity = note(owner_a(), 1_000);

        // Body owner must match the token's owner.
        let (status, _) = send(
            &router,
            request(Method::POST, "/entities", Some("beta"), Some(&entity)),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        send(
            &router,
            request(Method::POST, "/entities", Some("alpha"), Some(&entity)),
        )
        .await;

        // Claiming an existing id of another tenant is forbidden.
        let mut hijack = entity.clone();
        hijack.owner_id = OwnerId::new("user-b").unwrap();
        hijack.updated_at = 5_000;
        let uri = format!("/entities/{}", entity.id);
        let (status, _) = send(
            &router,
            request(Method::PATCH, &uri, Some("beta"), Some(&hijack)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &router,
            request(Method::GET, "/entities?owner=user-a", Some("beta"), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(&router, request(Method::GET, "/entities", Some("beta"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }
}
