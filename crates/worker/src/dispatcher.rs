//! Poll loop for pending jobs that never reached the pool directly.
//!
//! Submissions normally hand jobs straight to the [`WorkerPool`]. A job
//! stays `pending` when that handoff was missed (queue full, API process
//! without an in-process pool, restart between insert and handoff); the
//! dispatcher finds those and hands them over. The claim in
//! [`JobRunner::run`](crate::runner::JobRunner::run) keeps a job that is
//! dispatched twice from running twice.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use waypoint_db::repositories::JobRepo;

use crate::pool::WorkerPool;
use crate::runner::Dispatch;

/// Maximum number of jobs handed over per cycle.
const BATCH_SIZE: i64 = 64;

/// Background pending-job dispatcher.
pub struct JobDispatcher {
    pool: PgPool,
    workers: WorkerPool,
    poll_interval: Duration,
}

impl JobDispatcher {
    pub fn new(pool: PgPool, workers: WorkerPool, poll_interval: Duration) -> Self {
        Self {
            pool,
            workers,
            poll_interval,
        }
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Job dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.dispatch_pending().await {
                        tracing::error!(error = %e, "Dispatch cycle failed");
                    }
                }
            }
        }
    }

    /// One dispatch cycle. Returns the number of jobs handed to the pool.
    ///
    /// Only jobs older than one poll interval are considered, leaving fresh
    /// submissions to their direct handoff.
    pub async fn dispatch_pending(&self) -> Result<usize, sqlx::Error> {
        let grace = chrono::Duration::from_std(self.poll_interval).unwrap_or_default();
        let pending = JobRepo::list_pending(&self.pool, Utc::now() - grace, BATCH_SIZE).await?;

        let mut dispatched = 0;
        for job in pending {
            let accepted = self
                .workers
                .try_dispatch(Dispatch {
                    job_id: job.id,
                    owner_id: job.owner_id,
                })
                .await;
            if accepted {
                dispatched += 1;
            }
        }

        if dispatched > 0 {
            tracing::info!(dispatched, "Dispatched pending jobs");
        }
        Ok(dispatched)
    }
}
