use std::sync::Arc;

use waypoint_core::workflow::WorkflowRegistry;
use waypoint_worker::SubmissionService;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: waypoint_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// WebSocket connection manager.
    pub ws_manager: Arc<WsManager>,
    /// Registered workflows, keyed by job type.
    pub registry: Arc<WorkflowRegistry>,
    /// Creates jobs and hands them to the worker pool.
    pub submissions: SubmissionService,
}
