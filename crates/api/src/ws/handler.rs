use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use waypoint_core::error::CoreError;
use waypoint_core::job_events::{ACTION_SUBSCRIBE, ACTION_UNSUBSCRIBE};
use waypoint_core::types::DbId;

use crate::error::AppError;
use crate::handlers::jobs::find_and_authorize;
use crate::middleware::auth::WsAuthUser;
use crate::state::AppState;
use crate::ws::messages::{self, ClientFrame};

/// HTTP handler that upgrades the connection to WebSocket.
///
/// The token is validated before the upgrade; unauthenticated requests get
/// a 401 and never reach the socket. After the upgrade the connection is
/// registered with `WsManager` and managed by a sender task plus the
/// receive loop below.
pub async fn ws_handler(
    WsAuthUser(auth): WsAuthUser,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth.user_id))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsManager`.
///   2. Spawns a sender task that forwards messages from the manager channel.
///   3. Processes subscribe/unsubscribe requests on the current task.
///   4. Cleans up on disconnect.
async fn handle_socket(socket: WebSocket, state: AppState, user_id: DbId) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, user_id, "WebSocket connected");

    let ws_manager = state.ws_manager.clone();
    let mut rx = ws_manager.add(conn_id.clone(), user_id).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    // Receiver loop: process inbound messages.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(Message::Text(text)) => {
                handle_frame(&state, &conn_id, user_id, text.as_str()).await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: remove connection and abort sender task.
    ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Handle one client request. Replies go to this connection only.
async fn handle_frame(state: &AppState, conn_id: &str, user_id: DbId, text: &str) {
    let ws_manager = &state.ws_manager;

    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(conn_id, error = %e, "Malformed WebSocket frame");
            ws_manager
                .send_to(
                    conn_id,
                    messages::error("BAD_REQUEST", "Expected {\"action\", \"job_id\"}"),
                )
                .await;
            return;
        }
    };

    match frame.action.as_str() {
        ACTION_SUBSCRIBE => {
            match find_and_authorize(&state.pool, frame.job_id, user_id).await {
                Ok(_) => {
                    ws_manager
                        .subscribe(conn_id, frame.job_id, messages::subscribed(frame.job_id))
                        .await;
                    tracing::debug!(conn_id, job_id = %frame.job_id, "Subscribed to job");
                }
                Err(e) => {
                    let (code, message) = rejection(&e);
                    tracing::info!(
                        conn_id,
                        user_id,
                        job_id = %frame.job_id,
                        code,
                        "Subscription rejected",
                    );
                    ws_manager
                        .send_to(conn_id, messages::error(code, message))
                        .await;
                }
            }
        }
        ACTION_UNSUBSCRIBE => {
            ws_manager.unsubscribe(conn_id, frame.job_id).await;
        }
        other => {
            ws_manager
                .send_to(
                    conn_id,
                    messages::error("BAD_REQUEST", &format!("Unknown action '{other}'")),
                )
                .await;
        }
    }
}

/// Map a failed ownership check to an error frame. Store failures are
/// logged and reported generically.
fn rejection(err: &AppError) -> (&'static str, &'static str) {
    match err {
        AppError::Core(CoreError::NotFound { .. }) => ("NOT_FOUND", "Job not found"),
        AppError::Core(CoreError::Forbidden(_)) => {
            ("FORBIDDEN", "Cannot subscribe to another user's job")
        }
        other => {
            tracing::error!(error = %other, "Subscription check failed");
            ("INTERNAL_ERROR", "An internal error occurred")
        }
    }
}
