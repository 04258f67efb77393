//! Progress event models. Rows are append-only.

use serde::Serialize;
use sqlx::FromRow;
use waypoint_core::progress::Sequenced;
use waypoint_core::types::{DbId, JobId, Timestamp};

/// A row from the `job_progress_events` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ProgressEvent {
    pub id: DbId,
    pub job_id: JobId,
    pub step_label: String,
    pub percent: Option<i16>,
    pub detail: Option<serde_json::Value>,
    pub is_final: bool,
    pub created_at: Timestamp,
}

impl Sequenced for ProgressEvent {
    fn sequence(&self) -> i64 {
        self.id
    }
}

/// Input for a non-final progress event.
#[derive(Debug, Clone)]
pub struct NewProgressEvent {
    pub step_label: String,
    pub percent: Option<i16>,
    pub detail: Option<serde_json::Value>,
}
