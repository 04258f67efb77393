//! Handlers for the `/jobs` resource.
//!
//! All endpoints require authentication via [`AuthUser`]. A principal only
//! ever sees jobs it owns.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use waypoint_core::error::CoreError;
use waypoint_core::types::{DbId, JobId, TriggeredBy};
use waypoint_db::models::job::{Job, JobListQuery, JobSnapshot, JobView};
use waypoint_db::repositories::{JobRepo, ProgressEventRepo};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /jobs` and `POST /workflows/run`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Provenance. `scheduler` requires a scheduler token.
    #[serde(default)]
    pub triggered_by: Option<TriggeredBy>,
}

#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
}

/// Query parameters for `GET /jobs/{id}/events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only return events with a larger id. Defaults to 0 (all events).
    pub after: Option<DbId>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fetch a job by ID and verify the caller owns it.
///
/// Returns `NotFound` if the job does not exist, `Forbidden` if the caller
/// is not the owner.
pub(crate) async fn find_and_authorize(
    pool: &sqlx::PgPool,
    job_id: JobId,
    user_id: DbId,
) -> AppResult<Job> {
    let job = JobRepo::find_by_id(pool, job_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        }))?;

    if job.owner_id != user_id {
        return Err(AppError::Core(CoreError::Forbidden(
            "Cannot access another user's job".into(),
        )));
    }

    Ok(job)
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Submit a job for background execution. Returns 202 with the job id as
/// soon as the row is written; progress is observed via the WebSocket or
/// by polling.
pub async fn submit_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    let triggered_by = auth.trigger(input.triggered_by)?;
    let job_id = state
        .submissions
        .submit(&input.job_type, input.payload, auth.user_id, triggered_by)
        .await?;

    Ok(DataResponse::accepted(SubmittedJob { job_id }))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// List the caller's jobs, newest first. Supports optional `status`,
/// `limit`, and `offset` query parameters.
pub async fn list_jobs(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs: Vec<JobView> = JobRepo::list_by_owner(&state.pool, auth.user_id, &params)
        .await?
        .into_iter()
        .map(JobView::from)
        .collect();

    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
///
/// The job row together with every progress event written so far.
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = find_and_authorize(&state.pool, job_id, auth.user_id).await?;
    let events = ProgressEventRepo::list_for_job(&state.pool, job_id).await?;

    Ok(Json(DataResponse {
        data: JobSnapshot {
            job: job.into(),
            events,
        },
    }))
}

/// GET /api/v1/jobs/{id}/events?after=<event_id>
///
/// Progress events newer than `after`, oldest first.
pub async fn list_job_events(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Query(params): Query<EventsQuery>,
) -> AppResult<impl IntoResponse> {
    find_and_authorize(&state.pool, job_id, auth.user_id).await?;
    let events =
        ProgressEventRepo::list_after(&state.pool, job_id, params.after.unwrap_or(0)).await?;

    Ok(Json(DataResponse { data: events }))
}
