//! # Task Handlers
//!
//! The handler capability interface and the built-in task types. A handler
//! performs the work of one step: it receives the step's configuration map,
//! the carried input data, and the step timeout, and returns an output map
//! or a classified failure. Handlers are pure with respect to engine state;
//! any external state is their own concern.

pub mod conditional;
pub mod data_transform;
pub mod delay;
pub mod http_request;
pub mod log;

pub use conditional::ConditionalHandler;
pub use data_transform::DataTransformHandler;
pub use delay::DelayHandler;
pub use http_request::HttpRequestHandler;
pub use log::LogHandler;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::registry::TaskHandlerRegistry;

/// Classified handler failure.
///
/// `Retryable` signals a transient fault the engine may retry within the
/// step's budget; `Fatal` signals a permanent fault that short-circuits to
/// execution-level failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandlerError {
    #[error("{message}")]
    Retryable {
        message: String,
        details: Option<Value>,
    },

    #[error("{message}")]
    Fatal {
        message: String,
        details: Option<Value>,
    },
}

impl HandlerError {
    /// Create a retryable (transient) failure
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            details: None,
        }
    }

    /// Create a retryable failure with structured details
    pub fn retryable_with(message: impl Into<String>, details: Value) -> Self {
        Self::Retryable {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Create a fatal (permanent) failure
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            details: None,
        }
    }

    /// Create a fatal failure with structured details
    pub fn fatal_with(message: impl Into<String>, details: Value) -> Self {
        Self::Fatal {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Whether the engine may retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    /// Structured details, if the handler attached any
    pub fn details(&self) -> Option<&Value> {
        match self {
            Self::Retryable { details, .. } | Self::Fatal { details, .. } => details.as_ref(),
        }
    }
}

/// Result type for handler execution
pub type HandlerResult = Result<Value, HandlerError>;

/// The capability interface a step handler implements.
///
/// The engine bounds each call with the step's `timeout_seconds`; the
/// timeout is also passed in so handlers doing their own I/O can bound it
/// tighter (e.g. an HTTP client timeout).
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task type this handler processes
    fn task_type(&self) -> &str;

    /// Execute the task
    async fn execute(&self, config: &Value, input: &Value, timeout: Duration) -> HandlerResult;
}

/// Build a registry with all built-in handlers registered
pub fn default_registry() -> TaskHandlerRegistry {
    let registry = TaskHandlerRegistry::new();
    registry.register(std::sync::Arc::new(HttpRequestHandler::new()));
    registry.register(std::sync::Arc::new(DataTransformHandler));
    registry.register(std::sync::Arc::new(DelayHandler));
    registry.register(std::sync::Arc::new(ConditionalHandler));
    registry.register(std::sync::Arc::new(LogHandler));
    registry
}

/// Substitute `{key}` placeholders with top-level values from the input
/// map. Strings substitute bare; other values substitute as JSON. Unknown
/// placeholders are left in place.
pub(crate) fn render_template(template: &str, input: &Value) -> String {
    let Some(map) = input.as_object() else {
        return template.to_string();
    };

    let mut rendered = template.to_string();
    for (key, value) in map {
        let placeholder = format!("{{{key}}}");
        if !rendered.contains(&placeholder) {
            continue;
        }
        let replacement = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        rendered = rendered.replace(&placeholder, &replacement);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handler_error_classification() {
        assert!(HandlerError::retryable("transient").is_retryable());
        assert!(!HandlerError::fatal("permanent").is_retryable());
    }

    #[test]
    fn test_handler_error_details() {
        let err = HandlerError::retryable_with("boom", json!({"status": 503}));
        assert_eq!(err.details().unwrap()["status"], 503);
        assert!(HandlerError::fatal("plain").details().is_none());
    }

    #[test]
    fn test_render_template() {
        let input = json!({"user": "ada", "count": 3});
        assert_eq!(
            render_template("hello {user}, {count} new", &input),
            "hello ada, 3 new"
        );
        assert_eq!(render_template("no placeholders", &input), "no placeholders");
        assert_eq!(render_template("{missing}", &input), "{missing}");
        assert_eq!(render_template("{user}", &json!(null)), "{user}");
    }

    #[test]
    fn test_default_registry_has_builtins() {
        let registry = default_registry();
        let mut types = registry.task_types();
        types.sort();
        assert_eq!(
            types,
            vec!["conditional", "data_transform", "delay", "http_request", "log"]
        );
    }
}
