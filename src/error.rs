//! # Engine Error Types
//!
//! Structured error handling for the orchestration engine using thiserror
//! instead of `Box<dyn Error>` patterns. Service-layer operations surface
//! these kinds directly to callers.

use thiserror::Error;
use uuid::Uuid;

use crate::messaging::QueueError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Workflow {workflow_id} is not active (status: {status})")]
    WorkflowNotActive { workflow_id: Uuid, status: String },

    #[error("No handler registered for task type: {task_type}")]
    HandlerMissing { task_type: String },

    #[error("Workflow {workflow_id} definition is corrupt: {reason}")]
    DefinitionCorrupt { workflow_id: Uuid, reason: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Create a not-found error
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an invalid-transition error
    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error came from store or queue infrastructure.
    ///
    /// Infrastructure faults abort the current attempt without a state
    /// change; the worker must not acknowledge the message so the lease
    /// expires and the sweeper recovers.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Queue(_))
    }
}

/// Map unique-constraint violations onto Conflict, everything else onto Store.
pub fn map_unique_violation(err: sqlx::Error, conflict_message: &str) -> EngineError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return EngineError::conflict(conflict_message);
        }
    }
    EngineError::Store(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::not_found("execution", "abc");
        assert_eq!(err.to_string(), "execution abc not found");

        let err = EngineError::invalid_transition("execution", "completed", "running");
        assert!(err.to_string().contains("completed -> running"));

        let err = EngineError::HandlerMissing {
            task_type: "http_request".to_string(),
        };
        assert!(err.to_string().contains("http_request"));
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(EngineError::Store(sqlx::Error::PoolTimedOut).is_infrastructure());
        assert!(!EngineError::conflict("dup").is_infrastructure());
        assert!(!EngineError::validation("bad").is_infrastructure());
    }
}
