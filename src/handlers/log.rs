//! Log handler. Emits a templated message into the process log stream.
//!
//! Config schema: `{"message": "order {order_id} shipped", "level": "info"}`

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{render_template, HandlerResult, TaskHandler};

pub struct LogHandler;

#[async_trait]
impl TaskHandler for LogHandler {
    fn task_type(&self) -> &str {
        "log"
    }

    async fn execute(&self, config: &Value, input: &Value, _timeout: Duration) -> HandlerResult {
        let template = config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Log step executed");
        let level = config
            .get("level")
            .and_then(Value::as_str)
            .unwrap_or("info");

        let message = render_template(template, input);

        match level {
            "debug" => debug!(target: "flowline::workflow", "{message}"),
            "warning" => warn!(target: "flowline::workflow", "{message}"),
            "error" => error!(target: "flowline::workflow", "{message}"),
            _ => info!(target: "flowline::workflow", "{message}"),
        }

        Ok(json!({"logged_message": message, "level": level}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_template_substitution() {
        let config = json!({"message": "order {order_id} shipped"});
        let output = LogHandler
            .execute(&config, &json!({"order_id": 42}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(output["logged_message"], "order 42 shipped");
        assert_eq!(output["level"], "info");
    }

    #[tokio::test]
    async fn test_default_message_and_level_passthrough() {
        let output = LogHandler
            .execute(&json!({"level": "warning"}), &json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(output["logged_message"], "Log step executed");
        assert_eq!(output["level"], "warning");
    }
}
