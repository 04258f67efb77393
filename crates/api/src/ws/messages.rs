//! JSON text frames exchanged over the job progress WebSocket.

use axum::extract::ws::Message;
use serde::Deserialize;
use waypoint_core::job_events::{
    MSG_TYPE_ERROR, MSG_TYPE_JOB_PROGRESS, MSG_TYPE_JOB_STATUS, MSG_TYPE_SUBSCRIBED,
};
use waypoint_core::types::JobId;
use waypoint_db::models::job::JobView;
use waypoint_db::models::progress_event::ProgressEvent;

/// A request sent by the client, e.g.
/// `{"action":"subscribe","job_id":"..."}`.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub action: String,
    pub job_id: JobId,
}

pub fn subscribed(job_id: JobId) -> Message {
    text(serde_json::json!({
        "type": MSG_TYPE_SUBSCRIBED,
        "job_id": job_id,
    }))
}

pub fn job_progress(event: &ProgressEvent) -> Message {
    text(serde_json::json!({
        "type": MSG_TYPE_JOB_PROGRESS,
        "job_id": event.job_id,
        "event": event,
    }))
}

pub fn job_status(job: &JobView) -> Message {
    text(serde_json::json!({
        "type": MSG_TYPE_JOB_STATUS,
        "job_id": job.id,
        "job": job,
    }))
}

pub fn error(code: &str, message: &str) -> Message {
    text(serde_json::json!({
        "type": MSG_TYPE_ERROR,
        "code": code,
        "message": message,
    }))
}

fn text(value: serde_json::Value) -> Message {
    Message::Text(value.to_string().into())
}
