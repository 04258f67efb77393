//! Routes job updates from the event bus to subscribed WebSocket clients.
//!
//! [`ChannelRouter`] consumes the thin [`JobUpdate`] notifications, re-reads
//! the changed row from the job store and pushes it to the owner's
//! connections that subscribed to the job. A single router task processes
//! updates in bus order, which keeps delivery ordered per job.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use waypoint_db::models::job::JobView;
use waypoint_db::repositories::{JobRepo, ProgressEventRepo};
use waypoint_db::DbPool;
use waypoint_events::{JobChange, JobUpdate};

use crate::ws::{messages, WsManager};

pub struct ChannelRouter {
    pool: DbPool,
    ws_manager: Arc<WsManager>,
}

impl ChannelRouter {
    pub fn new(pool: DbPool, ws_manager: Arc<WsManager>) -> Self {
        Self { pool, ws_manager }
    }

    /// Run the routing loop until `cancel` fires or the bus closes.
    pub async fn run(self, mut receiver: broadcast::Receiver<JobUpdate>, cancel: CancellationToken) {
        tracing::info!("Job channel router started");

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };

            match received {
                Ok(update) => {
                    if let Err(e) = self.route(&update).await {
                        tracing::error!(
                            job_id = %update.job_id,
                            error = %e,
                            "Failed to route job update",
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Clients recover the skipped rows from the job store.
                    tracing::warn!(skipped = n, "Job channel router lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, job channel router shutting down");
                    break;
                }
            }
        }

        tracing::info!("Job channel router stopped");
    }

    /// Deliver one update. Returns the number of connections reached.
    pub async fn route(&self, update: &JobUpdate) -> Result<usize, sqlx::Error> {
        let message = match &update.change {
            JobChange::Progress { event_id } => {
                match ProgressEventRepo::find_by_id(&self.pool, *event_id).await? {
                    Some(event) if event.job_id == update.job_id => messages::job_progress(&event),
                    _ => {
                        tracing::warn!(
                            job_id = %update.job_id,
                            event_id,
                            "Progress update refers to a missing event",
                        );
                        return Ok(0);
                    }
                }
            }
            JobChange::Status { .. } => match JobRepo::find_by_id(&self.pool, update.job_id).await? {
                Some(job) => messages::job_status(&JobView::from(job)),
                None => return Ok(0),
            },
        };

        let delivered = self
            .ws_manager
            .send_to_subscribers(update.owner_id, update.job_id, message)
            .await;
        tracing::trace!(job_id = %update.job_id, delivered, "Job update routed");
        Ok(delivered)
    }
}
