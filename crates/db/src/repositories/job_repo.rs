//! Repository for the `jobs` table.
//!
//! Every mutating statement is conditional on the current `status_id`, so
//! the state machine `pending -> running -> {completed | failed}` is
//! enforced by the database itself:
//!
//! - [`JobRepo::claim`] is the single-writer gate (compare-and-swap on
//!   `pending`).
//! - Terminal writes only succeed once and always insert the job's final
//!   progress event in the same transaction.

use sqlx::PgPool;
use waypoint_core::types::{new_job_id, DbId, JobId, Timestamp};

use crate::models::job::{CreateJob, Job, JobListQuery, TerminalWrite};
use crate::models::progress_event::ProgressEvent;
use crate::models::status::JobStatus;

use super::progress_event_repo::COLUMNS as EVENT_COLUMNS;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, job_type, status_id, triggered_by, \
    payload, result, error, \
    created_at, started_at, completed_at, heartbeat_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Step label of the final event written on success.
pub const FINAL_LABEL_COMPLETED: &str = "completed";

/// Step label of the final event written on failure.
pub const FINAL_LABEL_FAILED: &str = "failed";

/// Provides the job lifecycle operations.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job. Returns once the row is durable.
    pub async fn create(pool: &PgPool, input: &CreateJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs (id, owner_id, job_type, status_id, triggered_by, payload) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(new_job_id())
            .bind(input.owner_id)
            .bind(&input.job_type)
            .bind(JobStatus::Pending.id())
            .bind(input.triggered_by.as_str())
            .bind(&input.payload)
            .fetch_one(pool)
            .await
    }

    /// Atomically move a job from `pending` to `running`.
    ///
    /// Returns `None` if the job is not pending any more (another worker won
    /// the claim, or the job is terminal). The loser must not write anything.
    pub async fn claim(pool: &PgPool, job_id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, started_at = clock_timestamp(), heartbeat_at = clock_timestamp() \
             WHERE id = $1 AND status_id = $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(JobStatus::Running.id())
            .bind(JobStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Refresh `heartbeat_at` of a running job.
    ///
    /// Returns `false` if the job is no longer running.
    pub async fn heartbeat(pool: &PgPool, job_id: JobId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET heartbeat_at = clock_timestamp() WHERE id = $1 AND status_id = $2",
        )
        .bind(job_id)
        .bind(JobStatus::Running.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a running job completed and append its final event.
    ///
    /// Returns `None` (and writes nothing) if the job is not running.
    pub async fn complete(
        pool: &PgPool,
        job_id: JobId,
        result: &serde_json::Value,
    ) -> Result<Option<TerminalWrite>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, result = $3, completed_at = clock_timestamp() \
             WHERE id = $1 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(JobStatus::Completed.id())
            .bind(result)
            .bind(JobStatus::Running.id())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Ok(None);
        };

        let event = insert_final_event(&mut tx, job_id, FINAL_LABEL_COMPLETED, Some(100), None)
            .await?;

        tx.commit().await?;
        Ok(Some(TerminalWrite { job, event }))
    }

    /// Mark a running job failed and append its final event, whose `detail`
    /// carries the error summary.
    ///
    /// Returns `None` (and writes nothing) if the job is not running.
    pub async fn fail(
        pool: &PgPool,
        job_id: JobId,
        error: &str,
    ) -> Result<Option<TerminalWrite>, sqlx::Error> {
        Self::fail_from(pool, job_id, error, JobStatus::Running).await
    }

    /// Fail a job that was never claimed (e.g. the worker's ownership check
    /// rejected it). Same writes as [`fail`](Self::fail), but from `pending`.
    pub async fn reject_pending(
        pool: &PgPool,
        job_id: JobId,
        error: &str,
    ) -> Result<Option<TerminalWrite>, sqlx::Error> {
        Self::fail_from(pool, job_id, error, JobStatus::Pending).await
    }

    async fn fail_from(
        pool: &PgPool,
        job_id: JobId,
        error: &str,
        expected: JobStatus,
    ) -> Result<Option<TerminalWrite>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE jobs \
             SET status_id = $2, error = $3, completed_at = clock_timestamp() \
             WHERE id = $1 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(JobStatus::Failed.id())
            .bind(error)
            .bind(expected.id())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Ok(None);
        };

        let detail = serde_json::json!({ "error": error });
        let event =
            insert_final_event(&mut tx, job_id, FINAL_LABEL_FAILED, None, Some(&detail)).await?;

        tx.commit().await?;
        Ok(Some(TerminalWrite { job, event }))
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Pending jobs created before `created_before`, oldest first.
    ///
    /// Used by the dispatcher to pick up jobs whose direct handoff was
    /// missed. Returned jobs still have to be claimed.
    pub async fn list_pending(
        pool: &PgPool,
        created_before: Timestamp,
        limit: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id = $1 AND created_at < $2 \
             ORDER BY created_at ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Pending.id())
            .bind(created_before)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Running jobs whose heartbeat is older than `stale_before`.
    pub async fn list_stale_running(
        pool: &PgPool,
        stale_before: Timestamp,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id = $1 AND COALESCE(heartbeat_at, started_at, created_at) < $2 \
             ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Running.id())
            .bind(stale_before)
            .fetch_all(pool)
            .await
    }

    /// List jobs owned by a principal, newest first.
    ///
    /// An unknown `status` name matches nothing.
    pub async fn list_by_owner(
        pool: &PgPool,
        owner_id: DbId,
        params: &JobListQuery,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let status_id = match params.status.as_deref() {
            Some(name) => match JobStatus::from_name(name) {
                Some(status) => Some(status.id()),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE owner_id = $1 AND ($2::SMALLINT IS NULL OR status_id = $2) \
             ORDER BY created_at DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(owner_id)
            .bind(status_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Delete a job; its progress events go with it (`ON DELETE CASCADE`).
    pub async fn delete(pool: &PgPool, job_id: JobId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn insert_final_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    job_id: JobId,
    label: &str,
    percent: Option<i16>,
    detail: Option<&serde_json::Value>,
) -> Result<ProgressEvent, sqlx::Error> {
    let query = format!(
        "INSERT INTO job_progress_events (job_id, step_label, percent, detail, is_final) \
         VALUES ($1, $2, $3, $4, TRUE) \
         RETURNING {EVENT_COLUMNS}"
    );
    sqlx::query_as::<_, ProgressEvent>(&query)
        .bind(job_id)
        .bind(label)
        .bind(percent)
        .bind(detail)
        .fetch_one(&mut **tx)
        .await
}
