//! Built-in workflows shipped with the orchestrator.

pub mod batch_echo;
pub mod echo;

use waypoint_core::workflow::WorkflowRegistry;

pub use batch_echo::BatchEchoWorkflow;
pub use echo::EchoWorkflow;

/// Registry containing every built-in workflow.
pub fn builtin_registry() -> WorkflowRegistry {
    WorkflowRegistry::new()
        .with(EchoWorkflow)
        .with(BatchEchoWorkflow)
}
