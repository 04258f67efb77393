//! The step loop shared by both execution shells.
//!
//! [`drive`] runs a [`Workflow`] to completion, handing every step's
//! progress to a [`ProgressSink`]. The background runner plugs in a sink
//! that writes progress rows; the synchronous shell ([`run_inline`]) plugs
//! in one that only collects them. Budget checks, retries and per-step
//! timeouts are identical in both.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use waypoint_core::workflow::{
    RetryPolicy, StepContext, StepError, StepOutcome, StepProgress, Workflow,
};

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Failure to record a step's progress.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The job left the `running` state underneath the worker (e.g. the
    /// watchdog failed it). Nothing more may be written.
    #[error("job is no longer running")]
    Detached,

    #[error("failed to record progress: {0}")]
    Store(#[from] sqlx::Error),
}

/// Receives one [`StepProgress`] per executed step, in order.
#[async_trait]
pub trait ProgressSink: Send {
    async fn record(&mut self, progress: &StepProgress) -> Result<(), SinkError>;
}

/// Sink that keeps progress in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub steps: Vec<StepProgress>,
}

#[async_trait]
impl ProgressSink for MemorySink {
    async fn record(&mut self, progress: &StepProgress) -> Result<(), SinkError> {
        self.steps.push(progress.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a step loop stopped without a result.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("step limit of {max} exceeded")]
    IterationBudget { max: u32 },

    #[error("time budget of {limit:?} exceeded")]
    TimeBudget { limit: Duration },

    #[error("step {step} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        step: u32,
        attempts: u32,
        last: String,
    },

    #[error("{0}")]
    Terminal(String),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl ExecutionError {
    /// Message suitable for `jobs.error`. Transient dependency detail and
    /// store errors are left out; they are only logged.
    pub fn summary(&self) -> String {
        match self {
            ExecutionError::IterationBudget { max } => {
                format!("The workflow did not finish within its limit of {max} steps")
            }
            ExecutionError::TimeBudget { limit } => format!(
                "The workflow did not finish within its time limit of {} seconds",
                limit.as_secs()
            ),
            ExecutionError::RetriesExhausted { step, attempts, .. } => format!(
                "Step {} could not be completed after {attempts} attempts",
                step + 1
            ),
            ExecutionError::Terminal(message) => message.clone(),
            ExecutionError::Sink(_) => "The job could not record its progress".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Step loop
// ---------------------------------------------------------------------------

/// Run `workflow` over `payload` until it finishes, fails or exhausts its
/// budget. Returns the workflow's result.
pub async fn drive<S>(
    workflow: &dyn Workflow,
    payload: &serde_json::Value,
    sink: &mut S,
) -> Result<serde_json::Value, ExecutionError>
where
    S: ProgressSink + ?Sized,
{
    let budget = workflow.budget();
    let policy = workflow.retry_policy();
    let deadline = Instant::now() + budget.max_duration;
    let mut history: Vec<serde_json::Value> = Vec::new();

    for iteration in 0..budget.max_iterations {
        let outcome = run_step(
            workflow,
            payload,
            &history,
            iteration,
            &policy,
            deadline,
            budget.max_duration,
        )
        .await?;

        sink.record(outcome.progress()).await?;

        match outcome {
            StepOutcome::Finished { result, .. } => return Ok(result),
            StepOutcome::Continue(progress) => {
                history.push(progress.detail.unwrap_or(serde_json::Value::Null));
            }
        }

        if Instant::now() >= deadline {
            return Err(ExecutionError::TimeBudget {
                limit: budget.max_duration,
            });
        }
    }

    Err(ExecutionError::IterationBudget {
        max: budget.max_iterations,
    })
}

/// Execute one step, retrying transient failures. Each attempt is bounded
/// by the time left before `deadline`.
async fn run_step(
    workflow: &dyn Workflow,
    payload: &serde_json::Value,
    history: &[serde_json::Value],
    iteration: u32,
    policy: &RetryPolicy,
    deadline: Instant,
    limit: Duration,
) -> Result<StepOutcome, ExecutionError> {
    let mut attempt = 0;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ExecutionError::TimeBudget { limit });
        }

        let ctx = StepContext {
            payload,
            history,
            iteration,
            attempt,
        };

        match tokio::time::timeout(remaining, workflow.step(ctx)).await {
            Err(_) => return Err(ExecutionError::TimeBudget { limit }),
            Ok(Ok(outcome)) => return Ok(outcome),
            Ok(Err(StepError::Terminal(message))) => {
                return Err(ExecutionError::Terminal(message));
            }
            Ok(Err(StepError::Transient(message))) => {
                if attempt >= policy.max_retries {
                    return Err(ExecutionError::RetriesExhausted {
                        step: iteration,
                        attempts: attempt + 1,
                        last: message,
                    });
                }
                attempt += 1;
                let delay = policy.backoff_for(attempt);
                tracing::warn!(
                    job_type = workflow.job_type(),
                    step = iteration,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Transient step failure, retrying",
                );
                tokio::time::sleep(delay.min(remaining)).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inline shell
// ---------------------------------------------------------------------------

/// Result of a workflow executed within the request.
#[derive(Debug, Clone)]
pub struct InlineRun {
    pub result: serde_json::Value,
    pub steps: Vec<StepProgress>,
}

/// Run `workflow` to completion in the caller's task, without touching the
/// job store.
pub async fn run_inline(
    workflow: &dyn Workflow,
    payload: &serde_json::Value,
) -> Result<InlineRun, ExecutionError> {
    let mut sink = MemorySink::default();
    let result = drive(workflow, payload, &mut sink).await?;
    Ok(InlineRun {
        result,
        steps: sink.steps,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
