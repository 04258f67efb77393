//! Response and frame shapes as they appear on the wire.

use serde::Deserialize;
use waypoint_core::job_events::is_terminal_status;
use waypoint_core::progress::Sequenced;
use waypoint_core::types::{DbId, JobId, Timestamp};

/// `{ "data": ... }` success envelope.
#[derive(Debug, Deserialize)]
pub struct DataResponse<T> {
    pub data: T,
}

/// `{ "error": ..., "code": ... }` error body.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
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

#[derive(Debug, Clone, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub owner_id: DbId,
    pub job_type: String,
    pub status: String,
    pub triggered_by: String,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl JobView {
    pub fn is_terminal(&self) -> bool {
        is_terminal_status(&self.status)
    }
}

/// A job together with every progress event written so far.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSnapshot {
    pub job: JobView,
    pub events: Vec<ProgressEvent>,
}

/// Frames pushed by the server over the job WebSocket.
///
/// Tags match the `MSG_TYPE_*` constants in `waypoint_core::job_events`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Subscribed { job_id: JobId },
    JobProgress { job_id: JobId, event: ProgressEvent },
    JobStatus { job_id: JobId, job: JobView },
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use waypoint_core::job_events::{
        MSG_TYPE_ERROR, MSG_TYPE_JOB_PROGRESS, MSG_TYPE_JOB_STATUS, MSG_TYPE_SUBSCRIBED,
    };

    use super::*;

    const JOB: &str = "01890a5d-ac96-774b-bcce-b302099a8057";

    fn event_json(id: i64, is_final: bool) -> serde_json::Value {
        json!({
            "id": id,
            "job_id": JOB,
            "step_label": "item 1/2",
            "percent": 50,
            "detail": { "item": "a" },
            "is_final": is_final,
            "created_at": "2026-01-01T00:00:00Z",
        })
    }

    #[test]
    fn frame_tags_match_shared_constants() {
        let subscribed = json!({ "type": MSG_TYPE_SUBSCRIBED, "job_id": JOB });
        assert_matches!(
            ServerFrame::parse(&subscribed.to_string()),
            Ok(ServerFrame::Subscribed { .. })
        );

        let progress = json!({
            "type": MSG_TYPE_JOB_PROGRESS,
            "job_id": JOB,
            "event": event_json(7, false),
        });
        assert_matches!(
            ServerFrame::parse(&progress.to_string()),
            Ok(ServerFrame::JobProgress { event, .. }) if event.id == 7
        );

        let status = json!({
            "type": MSG_TYPE_JOB_STATUS,
            "job_id": JOB,
            "job": {
                "id": JOB,
                "owner_id": 1,
                "job_type": "echo",
                "status": "completed",
                "triggered_by": "user",
                "payload": { "text": "hi" },
                "result": { "text": "hi" },
                "error": null,
                "created_at": "2026-01-01T00:00:00Z",
                "started_at": "2026-01-01T00:00:01Z",
                "completed_at": "2026-01-01T00:00:02Z",
            },
        });
        assert_matches!(
            ServerFrame::parse(&status.to_string()),
            Ok(ServerFrame::JobStatus { job, .. }) if job.is_terminal()
        );

        let error = json!({ "type": MSG_TYPE_ERROR, "code": "FORBIDDEN", "message": "no" });
        assert_matches!(
            ServerFrame::parse(&error.to_string()),
            Ok(ServerFrame::Error { code, .. }) if code == "FORBIDDEN"
        );
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        assert!(ServerFrame::parse(r#"{"type":"mystery"}"#).is_err());
    }

    #[test]
    fn event_sequence_is_its_row_id() {
        let event: ProgressEvent = serde_json::from_value(event_json(42, true)).unwrap();
        assert_eq!(event.sequence(), 42);
        assert!(event.is_final);
    }
}
