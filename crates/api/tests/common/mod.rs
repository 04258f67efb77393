#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use waypoint_api::router::build_app_router;
use waypoint_api::auth::jwt::{generate_access_token, JwtConfig};
use waypoint_api::config::ServerConfig;
use waypoint_api::state::AppState;
use waypoint_api::ws::WsManager;
use waypoint_core::types::DbId;
use waypoint_worker::workflows::builtin_registry;
use waypoint_worker::{SubmissionService, WorkerConfig, WorkerPool};

const TEST_JWT_SECRET: &str = "test-secret-that-is-long-enough-for-hs256";

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        worker_in_process: false,
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
            access_token_expiry_mins: 15,
        },
        worker: WorkerConfig::default(),
    }
}

/// Build application state around `pool`. Without `workers`, submitted
/// jobs stay `pending`.
pub fn build_test_state(pool: PgPool, workers: Option<WorkerPool>) -> AppState {
    let registry = Arc::new(builtin_registry());
    let submissions = SubmissionService::new(pool.clone(), Arc::clone(&registry), workers);

    AppState {
        pool,
        config: Arc::new(test_config()),
        ws_manager: Arc::new(WsManager::new()),
        registry,
        submissions,
    }
}

/// Build the full application router with all middleware layers, using the
/// given database pool and no workers.
pub fn build_test_app(pool: PgPool) -> Router {
    build_app_router(build_test_state(pool, None))
}

/// A valid access token for `user_id`.
pub fn token_for(user_id: DbId) -> String {
    token_with_role(user_id, "user")
}

/// A valid access token for `user_id` carrying `role`.
pub fn token_with_role(user_id: DbId, role: &str) -> String {
    generate_access_token(user_id, role, &test_config().jwt)
        .expect("token generation should succeed")
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should be readable")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, Some(token)).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body), None).await
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response<Body> {
    send(app, Method::POST, uri, Some(body), Some(token)).await
}

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
    token: Option<&str>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build");

    app.oneshot(request).await.expect("request should complete")
}
