//! Dual-mode dispatch rule.
//!
//! Decides whether a workflow runs inline inside the caller's request or as
//! a background job. Pure and deterministic: the same descriptor, trigger
//! and request budget always give the same answer.

use std::time::Duration;

use serde::Serialize;

use crate::types::TriggeredBy;
use crate::workflow::WorkflowDescriptor;

/// Where a workflow executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Inline in the request handler; no job row is created.
    Sync,
    /// Persisted as a job and executed by a background worker.
    Async,
}

/// Classify a workflow.
///
/// `request_budget` is the platform's hard request timeout. A workflow runs
/// inline only when it is a single step with no external lookups and its
/// expected duration fits in half of that budget. Scheduler-triggered runs
/// have no live caller and are always `Async`.
pub fn classify(
    descriptor: &WorkflowDescriptor,
    trigger: TriggeredBy,
    request_budget: Duration,
) -> ExecutionMode {
    if trigger == TriggeredBy::Scheduler {
        return ExecutionMode::Async;
    }
    if descriptor.step_count > 1 || descriptor.external_lookups {
        return ExecutionMode::Async;
    }
    if descriptor.expected_duration() > request_budget / 2 {
        return ExecutionMode::Async;
    }
    ExecutionMode::Sync
}
