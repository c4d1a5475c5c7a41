//! Delay handler. Sleeps for a configured number of seconds; the step
//! timeout still bounds the overall attempt.
//!
//! Config schema: `{"seconds": 5}`

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{HandlerError, HandlerResult, TaskHandler};

pub struct DelayHandler;

#[async_trait]
impl TaskHandler for DelayHandler {
    fn task_type(&self) -> &str {
        "delay"
    }

    async fn execute(&self, config: &Value, _input: &Value, _timeout: Duration) -> HandlerResult {
        let seconds = match config.get("seconds") {
            Some(value) => value
                .as_f64()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| {
                    HandlerError::fatal("'seconds' must be a non-negative number")
                })?,
            None => 1.0,
        };

        debug!(seconds, "delaying");
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;

        Ok(json!({"delayed_seconds": seconds}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_delay() {
        let output = DelayHandler
            .execute(&json!({"seconds": 0}), &json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(output, json!({"delayed_seconds": 0.0}));
    }

    #[tokio::test]
    async fn test_negative_delay_is_fatal() {
        let err = DelayHandler
            .execute(&json!({"seconds": -1}), &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_non_numeric_delay_is_fatal() {
        let err = DelayHandler
            .execute(&json!({"seconds": "soon"}), &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_configured_duration() {
        let start = tokio::time::Instant::now();
        DelayHandler
            .execute(&json!({"seconds": 30}), &json!({}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }
}
