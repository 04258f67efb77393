//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the central publish/subscribe hub for [`JobUpdate`]s.
//! It is designed to be shared via `Arc<EventBus>` across the application.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use waypoint_core::types::{DbId, JobId};

use crate::notify::PgNotifier;

// ---------------------------------------------------------------------------
// JobUpdate
// ---------------------------------------------------------------------------

/// What changed on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum JobChange {
    /// A progress event row was inserted.
    Progress { event_id: DbId },
    /// The job row moved to `status` (wire name, e.g. `"running"`).
    Status { status: String },
}

/// A "row changed" notification for one job.
///
/// Carries the owner so the delivery side can scope it without a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub owner_id: DbId,
    #[serde(flatten)]
    pub change: JobChange,
    /// When the update was published (UTC).
    pub timestamp: DateTime<Utc>,
}

impl JobUpdate {
    pub fn progress(job_id: JobId, owner_id: DbId, event_id: DbId) -> Self {
        Self {
            job_id,
            owner_id,
            change: JobChange::Progress { event_id },
            timestamp: Utc::now(),
        }
    }

    pub fn status(job_id: JobId, owner_id: DbId, status: impl Into<String>) -> Self {
        Self {
            job_id,
            owner_id,
            change: JobChange::Status {
                status: status.into(),
            },
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`JobUpdate`], in publish order.
///
/// # Usage
///
/// ```rust
/// use waypoint_events::bus::{EventBus, JobUpdate};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobUpdate::status(uuid::Uuid::nil(), 7, "running"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobUpdate>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an update to all current subscribers.
    ///
    /// If there are no active subscribers the update is silently dropped;
    /// the job store still holds the change.
    pub fn publish(&self, update: JobUpdate) {
        // A send error only means there are no receivers.
        let _ = self.sender.send(update);
    }

    /// Subscribe to all updates published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Where a worker announces job changes.
#[derive(Clone)]
pub enum Publisher {
    /// Worker runs inside the API process.
    Bus(Arc<EventBus>),
    /// Worker runs in its own process; updates travel via `NOTIFY`.
    Postgres(PgNotifier),
}

impl Publisher {
    /// Publish an update. Delivery failures are logged, never returned:
    /// the row is already committed and pollers will see it.
    pub async fn publish(&self, update: JobUpdate) {
        match self {
            Publisher::Bus(bus) => bus.publish(update),
            Publisher::Postgres(notifier) => {
                if let Err(e) = notifier.notify(&update).await {
                    tracing::warn!(
                        job_id = %update.job_id,
                        error = %e,
                        "Failed to publish job update via NOTIFY",
                    );
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
