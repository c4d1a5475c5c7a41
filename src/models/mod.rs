//! Row models over the durable store.
//!
//! Each entity pairs a `FromRow` struct with a `NewX` creation struct and
//! inherent async operations on `&PgPool`. State changes are
//! status-guarded single-statement updates; a `None` result signals that a
//! concurrent transition won the race.

pub mod execution;
pub mod execution_log;
pub mod step_execution;
pub mod workflow;
pub mod workflow_step;

pub use execution::{Execution, NewExecution};
pub use execution_log::{ExecutionLog, NewExecutionLog};
pub use step_execution::{NewStepExecution, StepExecution};
pub use workflow::{NewWorkflow, Workflow};
pub use workflow_step::{is_dense_ordering, NewWorkflowStep, WorkflowStep};
