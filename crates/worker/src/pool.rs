//! Bounded pool of job tasks fed by a non-blocking handoff queue.
//!
//! [`WorkerPool`] is the cheap, cloneable handle used by the submission
//! path and the dispatcher. [`WorkerPool::start`] also returns the
//! supervisor future, which owns every job task: it limits concurrency with
//! a semaphore, runs each job in its own `tokio::spawn`, and fails jobs whose
//! task panicked.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use waypoint_core::types::JobId;

use crate::runner::{Dispatch, JobRunner, RunOutcome};

/// Handle for handing jobs to the pool.
#[derive(Clone)]
pub struct WorkerPool {
    handoff: mpsc::Sender<Dispatch>,
    /// Jobs queued or executing. A job id is accepted at most once until
    /// its task finishes.
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

impl WorkerPool {
    /// Create the pool handle and its supervisor.
    ///
    /// The supervisor must be spawned by the caller. It stops accepting
    /// work when `cancel` fires and returns once in-flight jobs finish.
    pub fn start(
        runner: Arc<JobRunner>,
        concurrency: usize,
        handoff_capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, impl Future<Output = ()> + Send + 'static) {
        let (tx, rx) = mpsc::channel(handoff_capacity.max(1));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));

        let handle = Self {
            handoff: tx,
            in_flight: Arc::clone(&in_flight),
        };
        let supervisor = supervise(runner, rx, in_flight, concurrency.max(1), cancel);

        (handle, supervisor)
    }

    /// Hand a job to the pool without waiting.
    ///
    /// Returns `false` when the job is already queued or running, or when
    /// the queue is full or closed. The job then stays `pending` for the
    /// dispatcher to retry.
    pub async fn try_dispatch(&self, dispatch: Dispatch) -> bool {
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains(&dispatch.job_id) {
            return false;
        }

        match self.handoff.try_send(dispatch) {
            Ok(()) => {
                in_flight.insert(dispatch.job_id);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(job_id = %dispatch.job_id, "Worker handoff queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!(job_id = %dispatch.job_id, "Worker pool is shut down");
                false
            }
        }
    }

    /// Number of jobs queued or executing.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

async fn supervise(
    runner: Arc<JobRunner>,
    mut rx: mpsc::Receiver<Dispatch>,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
    concurrency: usize,
    cancel: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    tracing::info!(concurrency, "Worker pool started");

    loop {
        let dispatch = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
            received = rx.recv() => match received {
                Some(dispatch) => dispatch,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let runner = Arc::clone(&runner);
        let in_flight = Arc::clone(&in_flight);
        tasks.spawn(async move {
            let _permit = permit;
            supervise_job(runner, dispatch).await;
            in_flight.lock().await.remove(&dispatch.job_id);
        });
    }

    rx.close();
    if !tasks.is_empty() {
        tracing::info!(running = tasks.len(), "Waiting for in-flight jobs");
    }
    while tasks.join_next().await.is_some() {}
    tracing::info!("Worker pool stopped");
}

/// Run one job in its own task so a panicking workflow cannot take the
/// supervisor down, then fail the job if it did panic.
async fn supervise_job(runner: Arc<JobRunner>, dispatch: Dispatch) {
    let job_id = dispatch.job_id;
    let task = tokio::spawn({
        let runner = Arc::clone(&runner);
        async move { runner.run(dispatch).await }
    });

    match task.await {
        Ok(Ok(outcome)) => {
            tracing::debug!(job_id = %job_id, outcome = ?outcome, "Job task finished");
        }
        Ok(Err(e)) => {
            tracing::error!(job_id = %job_id, error = %e, "Job task failed");
        }
        Err(e) if e.is_panic() => {
            tracing::error!(job_id = %job_id, error = %e, "Job task panicked");
            match runner.fail_crashed(dispatch).await {
                Ok(RunOutcome::Failed) => {}
                Ok(outcome) => {
                    tracing::warn!(job_id = %job_id, outcome = ?outcome, "Crashed job was not running");
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to record crashed job");
                }
            }
        }
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Job task cancelled");
        }
    }
}
