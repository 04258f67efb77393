use waypoint_core::error::CoreError;

/// Errors surfaced by the submission and runner paths.
///
/// Workflow failures are not errors at this level: they end as a `failed`
/// job row. Only store and domain errors propagate.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
