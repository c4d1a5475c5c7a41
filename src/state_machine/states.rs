use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow definition lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Definition is being designed and may still change
    Draft,
    /// Definition admits new executions
    Active,
    /// Definition is no longer recommended; existing executions keep running
    Deprecated,
    /// Definition is retired
    Archived,
}

impl WorkflowStatus {
    /// Only active workflows admit new executions
    pub fn admits_executions(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Steps are mutable only while the workflow is a draft
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Draft)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Deprecated => write!(f, "deprecated"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "deprecated" => Ok(Self::Deprecated),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid workflow status: {s}")),
        }
    }
}

/// Execution lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Admitted and waiting for a worker
    Pending,
    /// A worker is driving the execution
    Running,
    /// All steps succeeded
    Completed,
    /// A step failed; non-terminal while retry budget remains
    Failed,
    /// Scheduled for another attempt
    Retrying,
    /// Operator cancelled
    Cancelled,
}

impl ExecutionStatus {
    /// Check if this is a terminal state (no further transitions allowed).
    ///
    /// `Failed` is not terminal here: whether it can still move to
    /// `Retrying` depends on the retry budget, which the store guards.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// States from which a worker may start driving the execution
    pub fn is_admissible(&self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }

    /// Check if this is an active state (a worker holds the execution)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

/// Step-execution states, one attempt per row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Attempt row created, handler not yet invoked
    Pending,
    /// Handler is executing
    Running,
    /// Handler succeeded
    Completed,
    /// Handler failed; a retry creates a new attempt row
    Failed,
    /// Attempt abandoned (cancellation observed)
    Skipped,
}

impl StepStatus {
    /// Check if this is a settled state for the attempt
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid step status: {s}")),
        }
    }
}

/// Execution log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_terminal_check() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_admissible_states() {
        assert!(ExecutionStatus::Pending.is_admissible());
        assert!(ExecutionStatus::Retrying.is_admissible());
        assert!(!ExecutionStatus::Running.is_admissible());
        assert!(!ExecutionStatus::Completed.is_admissible());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(ExecutionStatus::Retrying.to_string(), "retrying");
        assert_eq!(
            "retrying".parse::<ExecutionStatus>().unwrap(),
            ExecutionStatus::Retrying
        );

        assert_eq!(StepStatus::Skipped.to_string(), "skipped");
        assert_eq!("skipped".parse::<StepStatus>().unwrap(), StepStatus::Skipped);

        assert_eq!(WorkflowStatus::Deprecated.to_string(), "deprecated");
        assert!("bogus".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let status = ExecutionStatus::Running;
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "\"running\"");

        let parsed: ExecutionStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
    }

    #[test]
    fn test_workflow_admission() {
        assert!(WorkflowStatus::Active.admits_executions());
        assert!(!WorkflowStatus::Draft.admits_executions());
        assert!(!WorkflowStatus::Deprecated.admits_executions());
        assert!(WorkflowStatus::Draft.is_mutable());
        assert!(!WorkflowStatus::Active.is_mutable());
    }
}
