//! # Task Handler Registry
//!
//! Lookup table from `task_type` to handler capability. Populated at
//! startup, O(1) lookups, thread-safe for concurrent worker tasks.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::handlers::TaskHandler;

/// Registry of task handlers keyed by task type
#[derive(Default)]
pub struct TaskHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskHandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its task type. A later registration for the
    /// same task type replaces the earlier one.
    pub fn register(&self, handler: Arc<dyn TaskHandler>) {
        let task_type = handler.task_type().to_string();
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.insert(task_type.clone(), handler);
        info!(task_type = %task_type, "registered task handler");
    }

    /// Look up a handler for a task type
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(task_type).cloned()
    }

    /// All registered task types
    pub fn task_types(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.keys().cloned().collect()
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{HandlerResult, TaskHandler};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct EchoHandler;

    #[async_trait]
    impl TaskHandler for EchoHandler {
        fn task_type(&self) -> &str {
            "echo"
        }

        async fn execute(&self, _config: &Value, input: &Value, _timeout: Duration) -> HandlerResult {
            Ok(input.clone())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = TaskHandlerRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("echo").is_none());

        registry.register(Arc::new(EchoHandler));
        assert_eq!(registry.len(), 1);

        let handler = registry.get("echo").unwrap();
        assert_eq!(handler.task_type(), "echo");
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_registered_handler_executes() {
        let registry = TaskHandlerRegistry::new();
        registry.register(Arc::new(EchoHandler));

        let handler = registry.get("echo").unwrap();
        let output = handler
            .execute(&json!({}), &json!({"k": "v"}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(output, json!({"k": "v"}));
    }
}
