//! Workflow domain types: the execution plan, orchestrator states and the
//! errors a turn can surface.

mod error;
mod plan;
mod state;

pub use error::WorkflowError;
pub use plan::{ExecutionPlan, Step, StepStatus};
pub use state::WorkflowState;
