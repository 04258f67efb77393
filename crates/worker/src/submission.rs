//! Job Submission Service.

use std::sync::Arc;

use sqlx::PgPool;
use waypoint_core::types::{DbId, JobId, TriggeredBy};
use waypoint_core::workflow::WorkflowRegistry;
use waypoint_db::models::job::CreateJob;
use waypoint_db::repositories::JobRepo;

use crate::error::WorkerError;
use crate::pool::WorkerPool;
use crate::runner::Dispatch;

/// Validates, persists and hands off new jobs.
#[derive(Clone)]
pub struct SubmissionService {
    pool: PgPool,
    registry: Arc<WorkflowRegistry>,
    /// `None` when workers run in a separate process; their dispatcher
    /// picks the job up from the store.
    workers: Option<WorkerPool>,
}

impl SubmissionService {
    pub fn new(pool: PgPool, registry: Arc<WorkflowRegistry>, workers: Option<WorkerPool>) -> Self {
        Self {
            pool,
            registry,
            workers,
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    /// Create a `pending` job and hand it to the worker pool.
    ///
    /// Unknown job types and payloads the workflow rejects fail with
    /// [`CoreError::InvalidPayload`](waypoint_core::error::CoreError) before
    /// anything is written. The payload is stored verbatim. Only the insert
    /// is awaited; the handoff never blocks.
    pub async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        owner_id: DbId,
        triggered_by: TriggeredBy,
    ) -> Result<JobId, WorkerError> {
        self.registry.resolve(job_type, &payload)?;

        let job = JobRepo::create(
            &self.pool,
            &CreateJob {
                owner_id,
                job_type: job_type.to_string(),
                triggered_by,
                payload,
            },
        )
        .await?;

        tracing::info!(
            job_id = %job.id,
            owner_id,
            job_type,
            triggered_by = triggered_by.as_str(),
            "Job submitted",
        );

        if let Some(workers) = &self.workers {
            let dispatch = Dispatch {
                job_id: job.id,
                owner_id,
            };
            if !workers.try_dispatch(dispatch).await {
                tracing::debug!(job_id = %job.id, "Handoff skipped, leaving job for dispatcher");
            }
        }

        Ok(job.id)
    }
}
