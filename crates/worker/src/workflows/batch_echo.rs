//! `batch_echo`: echoes a list of items, one step per item.
//!
//! Exists to exercise multi-event jobs. An optional per-item delay makes
//! progress observable while the job runs.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use validator::Validate;
use waypoint_core::error::CoreError;
use waypoint_core::validation::parse_payload;
use waypoint_core::workflow::{
    StepContext, StepError, StepOutcome, StepProgress, Workflow, WorkflowDescriptor,
};

pub const JOB_TYPE: &str = "batch_echo";

#[derive(Debug, Deserialize, Validate)]
pub struct BatchEchoPayload {
    #[validate(length(min = 1, max = 32, message = "must contain 1 to 32 items"))]
    pub items: Vec<String>,
    /// Pause before echoing each item.
    #[serde(default)]
    #[validate(range(max = 10000, message = "must be at most 10000"))]
    pub delay_ms: u64,
}

pub struct BatchEchoWorkflow;

#[async_trait]
impl Workflow for BatchEchoWorkflow {
    fn job_type(&self) -> &'static str {
        JOB_TYPE
    }

    fn descriptor(&self) -> WorkflowDescriptor {
        WorkflowDescriptor {
            expected_duration_ms: 1500,
            step_count: 3,
            external_lookups: false,
        }
    }

    fn validate(&self, payload: &serde_json::Value) -> Result<(), CoreError> {
        parse_payload::<BatchEchoPayload>(payload).map(|_| ())
    }

    async fn step(&self, ctx: StepContext<'_>) -> Result<StepOutcome, StepError> {
        let payload: BatchEchoPayload =
            parse_payload(ctx.payload).map_err(|e| StepError::Terminal(e.to_string()))?;

        let index = ctx.iteration as usize;
        let Some(item) = payload.items.get(index) else {
            return Err(StepError::Terminal(format!(
                "No item at position {}",
                index + 1
            )));
        };

        if payload.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(payload.delay_ms)).await;
        }

        let total = payload.items.len();
        let percent = ((index + 1) * 100 / total) as i16;
        let progress = StepProgress::new(format!("item {}/{}", index + 1, total))
            .with_percent(percent)
            .with_detail(serde_json::json!({ "item": item }));

        if index + 1 < total {
            return Ok(StepOutcome::Continue(progress));
        }

        Ok(StepOutcome::Finished {
            progress,
            result: serde_json::json!({ "items": payload.items }),
        })
    }
}
