//! Fails `running` jobs whose worker stopped heartbeating.
//!
//! A worker refreshes `heartbeat_at` on the claim, on every progress write
//! and periodically while a step is in flight. A crash, a lost process or
//! a hung runtime leaves the job `running` with an old heartbeat; the
//! watchdog fails it so the owner gets a terminal outcome.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use waypoint_core::job_events::STATUS_FAILED;
use waypoint_db::repositories::JobRepo;
use waypoint_events::{JobUpdate, Publisher};

/// Error recorded on jobs failed by the watchdog.
pub const STALE_ERROR: &str = "The worker processing this job stopped responding";

/// Run the watchdog loop until `cancel` is triggered.
pub async fn run(
    pool: PgPool,
    publisher: Publisher,
    stale_after: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        stale_after_secs = stale_after.as_secs(),
        interval_secs = interval.as_secs(),
        "Stale job watchdog started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stale job watchdog stopping");
                break;
            }
            _ = ticker.tick() => {
                match reap_stale(&pool, &publisher, stale_after).await {
                    Ok(0) => tracing::debug!("Stale job watchdog: nothing to reap"),
                    Ok(reaped) => tracing::warn!(reaped, "Stale job watchdog: failed stale jobs"),
                    Err(e) => tracing::error!(error = %e, "Stale job watchdog: scan failed"),
                }
            }
        }
    }
}

/// Fail every running job whose heartbeat is older than `stale_after`.
/// Returns the number of jobs failed.
pub async fn reap_stale(
    pool: &PgPool,
    publisher: &Publisher,
    stale_after: Duration,
) -> Result<usize, sqlx::Error> {
    let threshold = chrono::Duration::from_std(stale_after).unwrap_or_default();
    let stale = JobRepo::list_stale_running(pool, Utc::now() - threshold).await?;

    let mut reaped = 0;
    for job in stale {
        // The job may have finished between the scan and this write.
        let Some(write) = JobRepo::fail(pool, job.id, STALE_ERROR).await? else {
            continue;
        };
        tracing::warn!(
            job_id = %job.id,
            owner_id = job.owner_id,
            last_heartbeat = ?job.heartbeat_at,
            "Failed stale job",
        );
        publisher
            .publish(JobUpdate::progress(job.id, job.owner_id, write.event.id))
            .await;
        publisher
            .publish(JobUpdate::status(job.id, job.owner_id, STATUS_FAILED))
            .await;
        reaped += 1;
    }

    Ok(reaped)
}
