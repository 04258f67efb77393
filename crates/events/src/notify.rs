//! Cross-process delivery of [`JobUpdate`]s through Postgres
//! `LISTEN`/`NOTIFY`.
//!
//! A standalone worker process has no access to the API server's
//! [`EventBus`]. It publishes with [`PgNotifier`]; the API server runs one
//! [`PgRelay`] that forwards every notification onto its local bus.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, JobUpdate};

/// Postgres notification channel carrying serialized [`JobUpdate`]s.
pub const NOTIFY_CHANNEL: &str = "waypoint_job_updates";

/// Pause before retrying after the listener connection fails.
const RELAY_RETRY_DELAY: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Publisher side
// ---------------------------------------------------------------------------

/// Sends [`JobUpdate`]s with `pg_notify`.
#[derive(Clone)]
pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn notify(&self, update: &JobUpdate) -> Result<(), sqlx::Error> {
        let payload = serde_json::to_string(update)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Relay side
// ---------------------------------------------------------------------------

/// Forwards notifications from [`NOTIFY_CHANNEL`] onto an [`EventBus`].
pub struct PgRelay {
    listener: PgListener,
}

impl PgRelay {
    /// Open a dedicated listener connection and start listening.
    ///
    /// Notifications sent after this returns are buffered until
    /// [`run`](Self::run) drains them.
    pub async fn connect(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        Ok(Self { listener })
    }

    /// Run until `cancel` is triggered.
    ///
    /// Malformed payloads are logged and skipped. Connection errors are
    /// logged; the listener reconnects on the next receive.
    pub async fn run(mut self, bus: Arc<EventBus>, cancel: CancellationToken) {
        tracing::info!(channel = NOTIFY_CHANNEL, "Job update relay started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job update relay stopping");
                    break;
                }
                received = self.listener.recv() => match received {
                    Ok(notification) => {
                        match serde_json::from_str::<JobUpdate>(notification.payload()) {
                            Ok(update) => bus.publish(update),
                            Err(e) => tracing::warn!(
                                error = %e,
                                payload = notification.payload(),
                                "Dropping malformed job update notification",
                            ),
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Job update listener failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(RELAY_RETRY_DELAY) => {}
                        }
                    }
                },
            }
        }
    }
}
