//! WebSocket message type constants for job progress delivery.
//!
//! Shared by the API's channel router (server side) and the client
//! consumer so both ends agree on the frame vocabulary.

/// Client asks to receive updates for one job.
pub const ACTION_SUBSCRIBE: &str = "subscribe";

/// Client stops receiving updates for one job.
pub const ACTION_UNSUBSCRIBE: &str = "unsubscribe";

/// Server acknowledges a subscription. Live updates for the job are
/// delivered from this point on.
pub const MSG_TYPE_SUBSCRIBED: &str = "subscribed";

/// A new progress event row was written.
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// The job row changed status.
pub const MSG_TYPE_JOB_STATUS: &str = "job_status";

/// A request on the socket was rejected.
pub const MSG_TYPE_ERROR: &str = "error";

/// Status names as they appear on the wire.
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

/// Whether a wire status name is terminal.
pub fn is_terminal_status(status: &str) -> bool {
    status == STATUS_COMPLETED || status == STATUS_FAILED
}
