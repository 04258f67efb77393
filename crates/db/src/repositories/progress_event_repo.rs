//! Repository for the `job_progress_events` table.
//!
//! Events are append-only. Non-final events can only be written while the
//! owning job is `running`; final events are written by
//! [`JobRepo`](super::JobRepo) together with the terminal status change.

use sqlx::PgPool;
use waypoint_core::types::{DbId, JobId};

use crate::models::progress_event::{NewProgressEvent, ProgressEvent};
use crate::models::status::JobStatus;

/// Column list for `job_progress_events` queries.
pub(crate) const COLUMNS: &str = "\
    id, job_id, step_label, percent, detail, is_final, created_at";

/// Provides append and read operations for progress events.
pub struct ProgressEventRepo;

impl ProgressEventRepo {
    /// Append a progress event for a running job and refresh its heartbeat.
    ///
    /// Returns `None` without writing anything when the job is not
    /// `running` (never claimed, or already terminal).
    pub async fn append(
        pool: &PgPool,
        job_id: JobId,
        input: &NewProgressEvent,
    ) -> Result<Option<ProgressEvent>, sqlx::Error> {
        let query = format!(
            "WITH touched AS ( \
                 UPDATE jobs SET heartbeat_at = clock_timestamp() \
                 WHERE id = $1 AND status_id = $2 \
                 RETURNING id \
             ) \
             INSERT INTO job_progress_events (job_id, step_label, percent, detail) \
             SELECT id, $3, $4, $5 FROM touched \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ProgressEvent>(&query)
            .bind(job_id)
            .bind(JobStatus::Running.id())
            .bind(&input.step_label)
            .bind(input.percent)
            .bind(&input.detail)
            .fetch_optional(pool)
            .await
    }

    /// Find a single event by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ProgressEvent>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM job_progress_events WHERE id = $1");
        sqlx::query_as::<_, ProgressEvent>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All events of a job in insertion order.
    pub async fn list_for_job(
        pool: &PgPool,
        job_id: JobId,
    ) -> Result<Vec<ProgressEvent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_progress_events \
             WHERE job_id = $1 \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, ProgressEvent>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }

    /// Events of a job with an ID greater than `after_id`, in insertion order.
    pub async fn list_after(
        pool: &PgPool,
        job_id: JobId,
        after_id: DbId,
    ) -> Result<Vec<ProgressEvent>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_progress_events \
             WHERE job_id = $1 AND id > $2 \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, ProgressEvent>(&query)
            .bind(job_id)
            .bind(after_id)
            .fetch_all(pool)
            .await
    }
}
