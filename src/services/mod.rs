//! Service interface consumed by the API layer: workflow definition
//! management and execution admission/lifecycle operations.

pub mod execution_service;
pub mod workflow_service;

pub use execution_service::{ExecutionService, TriggerRequest, TriggerResult};
pub use workflow_service::{StepSpec, WorkflowService};
