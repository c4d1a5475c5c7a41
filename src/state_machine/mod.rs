//! # Lifecycle State Machines
//!
//! Pure transition validation for the execution, step-execution, and
//! workflow lifecycles. This module holds no I/O: it takes
//! `(current, proposed)` and answers valid/invalid. Persistence-side
//! enforcement happens through status-guarded updates in the models,
//! which derive their guard sets from these tables.

pub mod states;

pub use states::{ExecutionStatus, LogLevel, StepStatus, WorkflowStatus};

use crate::error::EngineError;

/// Valid target states for an execution in the given state.
///
/// `Running -> Retrying` is the crash-recovery edge taken by the sweeper
/// when a lease is lost; the orchestrator itself always goes through
/// `Failed` first.
pub fn execution_transitions(from: ExecutionStatus) -> &'static [ExecutionStatus] {
    use ExecutionStatus::*;
    match from {
        Pending => &[Running, Cancelled],
        Running => &[Completed, Failed, Retrying, Cancelled],
        Failed => &[Retrying, Cancelled],
        Retrying => &[Running, Cancelled],
        Completed => &[],
        Cancelled => &[],
    }
}

/// Check if an execution transition is valid
pub fn execution_transition_allowed(from: ExecutionStatus, to: ExecutionStatus) -> bool {
    execution_transitions(from).contains(&to)
}

/// Validate an execution transition, returning `InvalidTransition` if not allowed
pub fn validate_execution_transition(
    from: ExecutionStatus,
    to: ExecutionStatus,
) -> Result<(), EngineError> {
    if execution_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::invalid_transition("execution", from, to))
    }
}

/// Valid target states for a step-execution attempt in the given state
pub fn step_transitions(from: StepStatus) -> &'static [StepStatus] {
    use StepStatus::*;
    match from {
        Pending => &[Running, Skipped],
        Running => &[Completed, Failed, Skipped],
        Completed => &[],
        Failed => &[],
        Skipped => &[],
    }
}

/// Check if a step-execution transition is valid
pub fn step_transition_allowed(from: StepStatus, to: StepStatus) -> bool {
    step_transitions(from).contains(&to)
}

/// Validate a step-execution transition
pub fn validate_step_transition(from: StepStatus, to: StepStatus) -> Result<(), EngineError> {
    if step_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::invalid_transition("step_execution", from, to))
    }
}

/// Valid target states for a workflow definition in the given state
pub fn workflow_transitions(from: WorkflowStatus) -> &'static [WorkflowStatus] {
    use WorkflowStatus::*;
    match from {
        Draft => &[Active, Deprecated, Archived],
        Active => &[Deprecated, Archived],
        Deprecated => &[Archived],
        Archived => &[],
    }
}

/// Check if a workflow transition is valid
pub fn workflow_transition_allowed(from: WorkflowStatus, to: WorkflowStatus) -> bool {
    workflow_transitions(from).contains(&to)
}

/// Validate a workflow transition
pub fn validate_workflow_transition(
    from: WorkflowStatus,
    to: WorkflowStatus,
) -> Result<(), EngineError> {
    if workflow_transition_allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::invalid_transition("workflow", from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionStatus as E;
    use StepStatus as S;

    #[test]
    fn test_execution_happy_path() {
        assert!(execution_transition_allowed(E::Pending, E::Running));
        assert!(execution_transition_allowed(E::Running, E::Completed));
    }

    #[test]
    fn test_execution_retry_path() {
        assert!(execution_transition_allowed(E::Running, E::Failed));
        assert!(execution_transition_allowed(E::Failed, E::Retrying));
        assert!(execution_transition_allowed(E::Retrying, E::Running));
    }

    #[test]
    fn test_execution_recovery_edge() {
        // sweeper edge for lost leases
        assert!(execution_transition_allowed(E::Running, E::Retrying));
    }

    #[test]
    fn test_execution_cancellation_from_non_terminal() {
        for from in [E::Pending, E::Running, E::Failed, E::Retrying] {
            assert!(execution_transition_allowed(from, E::Cancelled));
        }
    }

    #[test]
    fn test_execution_terminal_states_are_closed() {
        for to in [
            E::Pending,
            E::Running,
            E::Completed,
            E::Failed,
            E::Retrying,
            E::Cancelled,
        ] {
            assert!(!execution_transition_allowed(E::Completed, to));
            assert!(!execution_transition_allowed(E::Cancelled, to));
        }
    }

    #[test]
    fn test_execution_invalid_transitions() {
        assert!(!execution_transition_allowed(E::Pending, E::Completed));
        assert!(!execution_transition_allowed(E::Pending, E::Failed));
        assert!(!execution_transition_allowed(E::Failed, E::Running));
        assert!(!execution_transition_allowed(E::Failed, E::Completed));
        assert!(!execution_transition_allowed(E::Retrying, E::Completed));
        assert!(!execution_transition_allowed(E::Retrying, E::Failed));

        let err = validate_execution_transition(E::Completed, E::Running).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_step_attempt_lifecycle() {
        assert!(step_transition_allowed(S::Pending, S::Running));
        assert!(step_transition_allowed(S::Running, S::Completed));
        assert!(step_transition_allowed(S::Running, S::Failed));
        assert!(step_transition_allowed(S::Running, S::Skipped));
        assert!(step_transition_allowed(S::Pending, S::Skipped));

        // retries are new rows, never resurrection of a settled attempt
        assert!(!step_transition_allowed(S::Failed, S::Running));
        assert!(!step_transition_allowed(S::Failed, S::Pending));
        assert!(!step_transition_allowed(S::Completed, S::Running));
        assert!(!step_transition_allowed(S::Pending, S::Completed));
    }

    #[test]
    fn test_workflow_lifecycle() {
        use WorkflowStatus as W;
        assert!(workflow_transition_allowed(W::Draft, W::Active));
        assert!(workflow_transition_allowed(W::Active, W::Deprecated));
        assert!(workflow_transition_allowed(W::Draft, W::Archived));
        assert!(workflow_transition_allowed(W::Deprecated, W::Archived));
        assert!(!workflow_transition_allowed(W::Active, W::Draft));
        assert!(!workflow_transition_allowed(W::Archived, W::Active));
    }
}
