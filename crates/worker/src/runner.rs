//! Executes one job from claim to terminal write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use waypoint_core::job_events::{STATUS_COMPLETED, STATUS_FAILED, STATUS_RUNNING};
use waypoint_core::types::{DbId, JobId};
use waypoint_core::workflow::{StepProgress, WorkflowRegistry};
use waypoint_db::models::job::TerminalWrite;
use waypoint_db::models::progress_event::NewProgressEvent;
use waypoint_db::repositories::{JobRepo, ProgressEventRepo};
use waypoint_events::{JobUpdate, Publisher};

use crate::error::WorkerError;
use crate::executor::{self, ExecutionError, ProgressSink, SinkError};

/// Error recorded when the dispatching principal does not own the job.
pub const OWNERSHIP_ERROR: &str = "This job could not be started";

/// Error recorded when a job names a workflow this worker does not know.
pub const UNKNOWN_WORKFLOW_ERROR: &str = "This job type is not available";

/// Error recorded when the workflow panicked.
pub const CRASH_ERROR: &str = "The workflow stopped unexpectedly";

/// A request to execute a job on behalf of `owner_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub job_id: JobId,
    pub owner_id: DbId,
}

/// How a [`JobRunner::run`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    /// The job was missing or another worker claimed it first. Nothing was
    /// written.
    Skipped,
    /// The dispatching principal does not own the job; it was failed
    /// without running.
    Rejected,
    /// The job stopped being `running` mid-flight (e.g. the watchdog failed
    /// it). The runner wrote nothing further.
    Detached,
}

/// Claims jobs and drives their workflows.
pub struct JobRunner {
    pool: PgPool,
    registry: Arc<WorkflowRegistry>,
    publisher: Publisher,
    heartbeat_interval: Duration,
}

impl JobRunner {
    pub fn new(
        pool: PgPool,
        registry: Arc<WorkflowRegistry>,
        publisher: Publisher,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            pool,
            registry,
            publisher,
            heartbeat_interval,
        }
    }

    /// Execute a dispatched job.
    pub async fn run(&self, dispatch: Dispatch) -> Result<RunOutcome, WorkerError> {
        let Dispatch { job_id, owner_id } = dispatch;

        let Some(job) = JobRepo::find_by_id(&self.pool, job_id).await? else {
            tracing::warn!(job_id = %job_id, "Dispatched job does not exist");
            return Ok(RunOutcome::Skipped);
        };

        if job.owner_id != owner_id {
            tracing::warn!(
                job_id = %job_id,
                owner_id = job.owner_id,
                dispatched_by = owner_id,
                "Dispatch principal does not own job, rejecting",
            );
            let rejected = JobRepo::reject_pending(&self.pool, job_id, OWNERSHIP_ERROR).await?;
            if let Some(write) = rejected {
                self.announce_terminal(&write, STATUS_FAILED).await;
                return Ok(RunOutcome::Rejected);
            }
            return Ok(RunOutcome::Skipped);
        }

        let Some(job) = JobRepo::claim(&self.pool, job_id).await? else {
            tracing::debug!(job_id = %job_id, "Job already claimed, skipping");
            return Ok(RunOutcome::Skipped);
        };

        tracing::info!(
            job_id = %job_id,
            owner_id,
            job_type = %job.job_type,
            "Job claimed",
        );
        self.publisher
            .publish(JobUpdate::status(job_id, owner_id, STATUS_RUNNING))
            .await;

        let Some(workflow) = self.registry.get(&job.job_type) else {
            tracing::error!(job_id = %job_id, job_type = %job.job_type, "No workflow registered");
            return self.fail(job_id, owner_id, UNKNOWN_WORKFLOW_ERROR).await;
        };

        let heartbeat = self.spawn_heartbeat(job_id);
        let mut sink = StoreSink {
            pool: &self.pool,
            publisher: &self.publisher,
            job_id,
            owner_id,
        };
        let outcome = executor::drive(workflow.as_ref(), &job.payload, &mut sink).await;
        heartbeat.abort();

        match outcome {
            Ok(result) => match JobRepo::complete(&self.pool, job_id, &result).await? {
                Some(write) => {
                    tracing::info!(job_id = %job_id, "Job completed");
                    self.announce_terminal(&write, STATUS_COMPLETED).await;
                    Ok(RunOutcome::Completed)
                }
                None => {
                    tracing::warn!(job_id = %job_id, "Job left running state before completion");
                    Ok(RunOutcome::Detached)
                }
            },
            Err(ExecutionError::Sink(SinkError::Detached)) => {
                tracing::warn!(job_id = %job_id, "Job left running state mid-flight, abandoning");
                Ok(RunOutcome::Detached)
            }
            Err(e) => {
                if let ExecutionError::Sink(SinkError::Store(store)) = &e {
                    tracing::error!(job_id = %job_id, error = %store, "Failed to record progress");
                } else {
                    tracing::warn!(job_id = %job_id, error = %e, "Workflow failed");
                }
                self.fail(job_id, owner_id, &e.summary()).await
            }
        }
    }

    /// Fail a job whose task panicked. The panic payload is logged by the
    /// caller, never stored.
    pub async fn fail_crashed(&self, dispatch: Dispatch) -> Result<RunOutcome, WorkerError> {
        self.fail(dispatch.job_id, dispatch.owner_id, CRASH_ERROR).await
    }

    async fn fail(
        &self,
        job_id: JobId,
        owner_id: DbId,
        error: &str,
    ) -> Result<RunOutcome, WorkerError> {
        match JobRepo::fail(&self.pool, job_id, error).await? {
            Some(write) => {
                tracing::info!(job_id = %job_id, error, "Job failed");
                self.announce_terminal(&write, STATUS_FAILED).await;
                Ok(RunOutcome::Failed)
            }
            None => Ok(RunOutcome::Detached),
        }
    }

    /// Publish the final event and the status change, in that order.
    async fn announce_terminal(&self, write: &TerminalWrite, status: &str) {
        let job_id = write.job.id;
        let owner_id = write.job.owner_id;
        self.publisher
            .publish(JobUpdate::progress(job_id, owner_id, write.event.id))
            .await;
        self.publisher
            .publish(JobUpdate::status(job_id, owner_id, status))
            .await;
    }

    /// Keep `heartbeat_at` fresh while a step is in flight. Aborted by the
    /// caller once the step loop returns.
    fn spawn_heartbeat(&self, job_id: JobId) -> tokio::task::JoinHandle<()> {
        let pool = self.pool.clone();
        let period = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match JobRepo::heartbeat(&pool, job_id).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Heartbeat refresh failed");
                    }
                }
            }
        })
    }
}

/// Writes each step's progress as a job event and announces it.
struct StoreSink<'a> {
    pool: &'a PgPool,
    publisher: &'a Publisher,
    job_id: JobId,
    owner_id: DbId,
}

#[async_trait]
impl ProgressSink for StoreSink<'_> {
    async fn record(&mut self, progress: &StepProgress) -> Result<(), SinkError> {
        let input = NewProgressEvent {
            step_label: progress.label.clone(),
            percent: progress.percent,
            detail: progress.detail.clone(),
        };
        let event = ProgressEventRepo::append(self.pool, self.job_id, &input)
            .await?
            .ok_or(SinkError::Detached)?;

        self.publisher
            .publish(JobUpdate::progress(self.job_id, self.owner_id, event.id))
            .await;
        Ok(())
    }
}
