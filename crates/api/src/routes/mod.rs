pub mod health;
pub mod jobs;
pub mod workflows;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                          WebSocket (token via ?token= or Authorization)
///
/// /jobs                        list, submit
/// /jobs/{id}                   job + progress events
/// /jobs/{id}/events            progress events after ?after=
///
/// /workflows                   catalogue
/// /workflows/run               dual-mode run
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/jobs", jobs::router())
        .nest("/workflows", workflows::router())
}
