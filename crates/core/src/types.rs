use serde::{Deserialize, Serialize};

/// Principal ids are PostgreSQL BIGINT (the JWT `sub` claim).
pub type DbId = i64;

/// Jobs are keyed by UUID v7 so ids sort by creation time.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Who asked for a job. Recorded for provenance only; execution does not
/// branch on it except in the dispatch rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    User,
    Scheduler,
}

impl TriggeredBy {
    /// Value stored in `jobs.triggered_by`.
    pub fn as_str(self) -> &'static str {
        match self {
            TriggeredBy::User => "user",
            TriggeredBy::Scheduler => "scheduler",
        }
    }

    /// Parse the stored column value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(TriggeredBy::User),
            "scheduler" => Some(TriggeredBy::Scheduler),
            _ => None,
        }
    }
}

/// Generate a fresh, time-ordered job id.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
