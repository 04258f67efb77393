//! Job entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use waypoint_core::types::{DbId, JobId, Timestamp, TriggeredBy};

use super::progress_event::ProgressEvent;
use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: DbId,
    pub job_type: String,
    pub status_id: StatusId,
    pub triggered_by: String,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub heartbeat_at: Option<Timestamp>,
}

impl Job {
    /// Decoded status. `None` only if the lookup table has drifted from
    /// [`JobStatus`].
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.status_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(JobStatus::is_terminal)
    }
}

/// Input for [`JobRepo::create`](crate::repositories::JobRepo::create).
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub owner_id: DbId,
    pub job_type: String,
    pub triggered_by: TriggeredBy,
    pub payload: serde_json::Value,
}

/// Client-facing view of a job: the row with `status` spelled out and the
/// worker bookkeeping (`heartbeat_at`) left out.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub owner_id: DbId,
    pub job_type: String,
    pub status: &'static str,
    pub triggered_by: String,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let status = job.status().map(JobStatus::name).unwrap_or("unknown");
        Self {
            id: job.id,
            owner_id: job.owner_id,
            job_type: job.job_type,
            status,
            triggered_by: job.triggered_by,
            payload: job.payload,
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// A job together with its full progress history, as returned by
/// `GET /api/v1/jobs/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job: JobView,
    pub events: Vec<ProgressEvent>,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by status name (`pending`, `running`, `completed`, `failed`).
    pub status: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Outcome of a terminal write: the updated row and the final event that
/// was inserted with it.
#[derive(Debug, Clone)]
pub struct TerminalWrite {
    pub job: Job,
    pub event: ProgressEvent,
}
