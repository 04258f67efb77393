//! `echo`: returns the submitted text in a single step.

use async_trait::async_trait;
use serde::Deserialize;
use validator::Validate;
use waypoint_core::error::CoreError;
use waypoint_core::validation::parse_payload;
use waypoint_core::workflow::{
    StepContext, StepError, StepOutcome, StepProgress, Workflow, WorkflowDescriptor,
};

pub const JOB_TYPE: &str = "echo";

#[derive(Debug, Deserialize, Validate)]
pub struct EchoPayload {
    #[validate(length(min = 1, max = 10000, message = "must be 1 to 10000 characters"))]
    pub text: String,
}

pub struct EchoWorkflow;

#[async_trait]
impl Workflow for EchoWorkflow {
    fn job_type(&self) -> &'static str {
        JOB_TYPE
    }

    fn descriptor(&self) -> WorkflowDescriptor {
        WorkflowDescriptor {
            expected_duration_ms: 10,
            step_count: 1,
            external_lookups: false,
        }
    }

    fn validate(&self, payload: &serde_json::Value) -> Result<(), CoreError> {
        parse_payload::<EchoPayload>(payload).map(|_| ())
    }

    async fn step(&self, ctx: StepContext<'_>) -> Result<StepOutcome, StepError> {
        let payload: EchoPayload =
            parse_payload(ctx.payload).map_err(|e| StepError::Terminal(e.to_string()))?;
        let result = serde_json::json!({ "text": payload.text });

        Ok(StepOutcome::Finished {
            progress: StepProgress::new("processing").with_percent(100),
            result,
        })
    }
}
