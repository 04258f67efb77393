//! Handlers for the `/workflows` resource: the workflow catalogue and the
//! dual-mode run endpoint.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use waypoint_core::dispatch::{classify, ExecutionMode};
use waypoint_core::types::{JobId, TriggeredBy};
use waypoint_core::workflow::{StepProgress, WorkflowDescriptor};
use waypoint_worker::executor;

use crate::error::{AppError, AppResult};
use crate::handlers::jobs::SubmitJobRequest;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Catalogue entry for one registered workflow.
#[derive(Debug, Serialize)]
pub struct WorkflowInfo {
    pub job_type: &'static str,
    pub descriptor: WorkflowDescriptor,
    /// How a user-triggered run is executed under the current request budget.
    pub mode: ExecutionMode,
}

/// Response of `POST /workflows/run`, tagged by `mode`.
#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RunResponse {
    Sync {
        result: serde_json::Value,
        steps: Vec<StepProgress>,
    },
    Async {
        job_id: JobId,
    },
}

/// GET /api/v1/workflows
pub async fn list_workflows(
    _auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let budget = state.config.request_timeout();
    let workflows: Vec<WorkflowInfo> = state
        .registry
        .iter()
        .map(|workflow| {
            let descriptor = workflow.descriptor();
            WorkflowInfo {
                job_type: workflow.job_type(),
                descriptor,
                mode: classify(&descriptor, TriggeredBy::User, budget),
            }
        })
        .collect();

    Ok(Json(DataResponse { data: workflows }))
}

/// POST /api/v1/workflows/run
///
/// Runs short workflows inside the request (200, `mode: "sync"`) and
/// submits everything else as a background job (202, `mode: "async"`).
/// Both paths validate the payload identically and run the same step
/// executor.
pub async fn run_workflow(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    let triggered_by = auth.trigger(input.triggered_by)?;
    let workflow = state.registry.resolve(&input.job_type, &input.payload)?;
    let mode = classify(
        &workflow.descriptor(),
        triggered_by,
        state.config.request_timeout(),
    );

    tracing::debug!(
        job_type = %input.job_type,
        user_id = auth.user_id,
        mode = ?mode,
        "Dispatching workflow run",
    );

    match mode {
        ExecutionMode::Sync => {
            let run = executor::run_inline(workflow.as_ref(), &input.payload)
                .await
                .map_err(|e| {
                    tracing::warn!(
                        job_type = %input.job_type,
                        user_id = auth.user_id,
                        error = %e,
                        "Inline workflow failed",
                    );
                    AppError::WorkflowFailed(e.summary())
                })?;

            Ok(DataResponse::ok(RunResponse::Sync {
                result: run.result,
                steps: run.steps,
            }))
        }
        ExecutionMode::Async => {
            let job_id = state
                .submissions
                .submit(&input.job_type, input.payload, auth.user_id, triggered_by)
                .await?;

            Ok(DataResponse::accepted(RunResponse::Async { job_id }))
        }
    }
}
