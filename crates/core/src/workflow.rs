//! The seam through which workflow-specific logic enters the orchestrator.
//!
//! Each job type registers one [`Workflow`] implementation in a
//! [`WorkflowRegistry`]. The orchestrator only ever sees the trait: it
//! validates payloads, reads the static [`WorkflowDescriptor`] for the
//! dispatch rule, and calls [`Workflow::step`] until the workflow reports
//! [`StepOutcome::Finished`] or fails.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Static description
// ---------------------------------------------------------------------------

/// Static shape of a workflow, known per job type and never computed at
/// runtime. Input to [`crate::dispatch::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkflowDescriptor {
    /// Typical wall time of a full run, in milliseconds.
    pub expected_duration_ms: u64,
    /// Number of dependent steps in a typical run.
    pub step_count: u32,
    /// Whether any step calls out to an external service.
    pub external_lookups: bool,
}

impl WorkflowDescriptor {
    pub fn expected_duration(&self) -> Duration {
        Duration::from_millis(self.expected_duration_ms)
    }
}

/// Guard against runaway step loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    /// Maximum number of steps before the job is failed.
    pub max_iterations: u32,
    /// Maximum wall time for the whole step loop.
    pub max_duration: Duration,
}

impl Default for StepBudget {
    fn default() -> Self {
        Self {
            max_iterations: 32,
            max_duration: Duration::from_secs(15 * 60),
        }
    }
}

/// How transient step failures are retried inside the step loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between retries.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling each time.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// Step I/O
// ---------------------------------------------------------------------------

/// What a step sees: the immutable payload plus everything earlier steps
/// produced.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub payload: &'a serde_json::Value,
    /// `detail` of every earlier step, oldest first. `Null` when a step
    /// reported no detail.
    pub history: &'a [serde_json::Value],
    /// Zero-based index of the step being executed.
    pub iteration: u32,
    /// Zero-based attempt number for this step (non-zero after transient
    /// failures).
    pub attempt: u32,
}

/// Progress reported for one executed step. Becomes one progress event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepProgress {
    pub label: String,
    pub percent: Option<i16>,
    pub detail: Option<serde_json::Value>,
}

impl StepProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            percent: None,
            detail: None,
        }
    }

    /// Attach a completion estimate, clamped to 0..=100.
    pub fn with_percent(mut self, percent: i16) -> Self {
        self.percent = Some(percent.clamp(0, 100));
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// More steps follow.
    Continue(StepProgress),
    /// Last step; `result` becomes the job result.
    Finished {
        progress: StepProgress,
        result: serde_json::Value,
    },
}

impl StepOutcome {
    pub fn progress(&self) -> &StepProgress {
        match self {
            StepOutcome::Continue(progress) => progress,
            StepOutcome::Finished { progress, .. } => progress,
        }
    }
}

/// Failure raised by a step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// A dependency failed recoverably; the step loop retries it.
    /// The message is logged but never shown to the job owner.
    #[error("transient step failure: {0}")]
    Transient(String),

    /// The workflow cannot continue. The message is shown to the job owner
    /// and must be human-readable.
    #[error("{0}")]
    Terminal(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A named, pluggable step loop.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Registry key, stored in `jobs.job_type`.
    fn job_type(&self) -> &'static str;

    fn descriptor(&self) -> WorkflowDescriptor;

    fn budget(&self) -> StepBudget {
        StepBudget::default()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Check the payload shape. Called before a job row is created.
    fn validate(&self, payload: &serde_json::Value) -> Result<(), CoreError>;

    /// Execute the next step.
    async fn step(&self, ctx: StepContext<'_>) -> Result<StepOutcome, StepError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps `job_type` strings to their [`Workflow`] implementation.
///
/// Built once at startup and shared behind an `Arc`.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<&'static str, Arc<dyn Workflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow, replacing any earlier one with the same type.
    pub fn register(&mut self, workflow: Arc<dyn Workflow>) -> &mut Self {
        self.workflows.insert(workflow.job_type(), workflow);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<W: Workflow + 'static>(mut self, workflow: W) -> Self {
        self.register(Arc::new(workflow));
        self
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows.get(job_type).cloned()
    }

    /// Look up a workflow and validate a payload for it.
    ///
    /// Unknown job types are reported as [`CoreError::InvalidPayload`] so
    /// both failure modes of a submission surface the same way.
    pub fn resolve(
        &self,
        job_type: &str,
        payload: &serde_json::Value,
    ) -> Result<Arc<dyn Workflow>, CoreError> {
        let workflow = self
            .get(job_type)
            .ok_or_else(|| CoreError::InvalidPayload(format!("Unknown job type '{job_type}'")))?;
        workflow.validate(payload)?;
        Ok(workflow)
    }

    /// Registered workflows in job-type order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Workflow>> {
        self.workflows.values()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("job_types", &self.workflows.keys().collect::<Vec<_>>())
            .finish()
    }
}
