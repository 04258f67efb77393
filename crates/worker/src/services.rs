//! Starts and stops the background worker tasks as one unit.
//!
//! Used by the standalone worker binary and by the API server when it runs
//! workers in-process.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use waypoint_core::workflow::WorkflowRegistry;
use waypoint_events::Publisher;

use crate::config::WorkerConfig;
use crate::dispatcher::JobDispatcher;
use crate::pool::WorkerPool;
use crate::runner::JobRunner;
use crate::watchdog;

/// Running worker pool, dispatcher and watchdog.
pub struct WorkerServices {
    workers: WorkerPool,
    cancel: CancellationToken,
    pool_handle: JoinHandle<()>,
    dispatcher_handle: JoinHandle<()>,
    watchdog_handle: JoinHandle<()>,
}

impl WorkerServices {
    pub fn spawn(
        pool: PgPool,
        registry: Arc<WorkflowRegistry>,
        publisher: Publisher,
        config: &WorkerConfig,
    ) -> Self {
        let cancel = CancellationToken::new();

        let runner = Arc::new(JobRunner::new(
            pool.clone(),
            registry,
            publisher.clone(),
            config.heartbeat_interval(),
        ));
        let (workers, supervisor) = WorkerPool::start(
            runner,
            config.concurrency,
            config.handoff_capacity,
            cancel.child_token(),
        );
        let pool_handle = tokio::spawn(supervisor);

        let dispatcher = JobDispatcher::new(pool.clone(), workers.clone(), config.poll_interval());
        let dispatcher_cancel = cancel.child_token();
        let dispatcher_handle = tokio::spawn(async move {
            dispatcher.run(dispatcher_cancel).await;
        });

        let watchdog_handle = tokio::spawn(watchdog::run(
            pool,
            publisher,
            config.stale_after(),
            config.watchdog_interval(),
            cancel.child_token(),
        ));

        tracing::info!("Worker services started (pool, dispatcher, watchdog)");

        Self {
            workers,
            cancel,
            pool_handle,
            dispatcher_handle,
            watchdog_handle,
        }
    }

    /// Handle for submitting work to the pool.
    pub fn workers(&self) -> WorkerPool {
        self.workers.clone()
    }

    /// Stop accepting work and wait up to `drain_timeout` for running jobs.
    /// Jobs still running afterwards are left to the watchdog.
    pub async fn shutdown(self, drain_timeout: Duration) {
        self.cancel.cancel();

        let _ = tokio::time::timeout(Duration::from_secs(5), self.dispatcher_handle).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), self.watchdog_handle).await;

        if tokio::time::timeout(drain_timeout, self.pool_handle)
            .await
            .is_err()
        {
            tracing::warn!(
                drain_timeout_secs = drain_timeout.as_secs(),
                "Worker pool did not drain in time",
            );
        }
        tracing::info!("Worker services stopped");
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
