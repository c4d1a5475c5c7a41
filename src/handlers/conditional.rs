//! Conditional handler. Evaluates a predicate over the input and emits the
//! configured branch payload.
//!
//! Config schema:
//! ```json
//! {
//!   "condition": {
//!     "field": "some_key",
//!     "operator": "eq" | "ne" | "gt" | "lt" | "contains" | "exists",
//!     "value": "expected_value"
//!   },
//!   "on_true": {"result": "condition_met"},
//!   "on_false": {"result": "condition_not_met"}
//! }
//! ```

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::{HandlerError, HandlerResult, TaskHandler};

pub struct ConditionalHandler;

#[async_trait]
impl TaskHandler for ConditionalHandler {
    fn task_type(&self) -> &str {
        "conditional"
    }

    async fn execute(&self, config: &Value, input: &Value, _timeout: Duration) -> HandlerResult {
        let condition = config.get("condition").unwrap_or(&Value::Null);
        let field = condition
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::fatal("condition requires a 'field' string"))?;
        let operator = condition
            .get("operator")
            .and_then(Value::as_str)
            .unwrap_or("eq");
        let expected = condition.get("value").unwrap_or(&Value::Null);

        let actual = input.get(field).unwrap_or(&Value::Null);

        let result = match operator {
            "eq" => actual == expected,
            "ne" => actual != expected,
            "gt" => compare(actual, expected, operator)?,
            "lt" => compare(actual, expected, operator)?,
            "contains" => contains(actual, expected),
            "exists" => input.get(field).is_some(),
            other => {
                return Err(HandlerError::fatal(format!(
                    "unknown condition operator: {other}"
                )))
            }
        };

        let branch_key = if result { "on_true" } else { "on_false" };
        let mut output = Map::new();
        output.insert("condition_result".to_string(), json!(result));
        if let Some(branch) = config.get(branch_key).and_then(Value::as_object) {
            for (key, value) in branch {
                output.insert(key.clone(), value.clone());
            }
        }

        Ok(Value::Object(output))
    }
}

/// Ordered comparison over numbers, or strings when both sides are strings
fn compare(actual: &Value, expected: &Value, operator: &str) -> Result<bool, HandlerError> {
    if let (Some(a), Some(e)) = (actual.as_f64(), expected.as_f64()) {
        return Ok(if operator == "gt" { a > e } else { a < e });
    }
    if let (Some(a), Some(e)) = (actual.as_str(), expected.as_str()) {
        return Ok(if operator == "gt" { a > e } else { a < e });
    }
    Err(HandlerError::fatal(format!(
        "cannot apply '{operator}' to {actual} and {expected}"
    )))
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => expected.as_str().map(|e| s.contains(e)).unwrap_or(false),
        Value::Array(items) => items.contains(expected),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(config: Value, input: Value) -> HandlerResult {
        ConditionalHandler
            .execute(&config, &input, Duration::from_secs(1))
            .await
    }

    #[tokio::test]
    async fn test_eq_with_branches() {
        let config = json!({
            "condition": {"field": "status", "operator": "eq", "value": "ok"},
            "on_true": {"route": "fast"},
            "on_false": {"route": "slow"}
        });

        let output = run(config.clone(), json!({"status": "ok"})).await.unwrap();
        assert_eq!(output, json!({"condition_result": true, "route": "fast"}));

        let output = run(config, json!({"status": "bad"})).await.unwrap();
        assert_eq!(output, json!({"condition_result": false, "route": "slow"}));
    }

    #[tokio::test]
    async fn test_ne() {
        let config = json!({"condition": {"field": "n", "operator": "ne", "value": 1}});
        let output = run(config, json!({"n": 2})).await.unwrap();
        assert_eq!(output["condition_result"], true);
    }

    #[tokio::test]
    async fn test_numeric_ordering() {
        let gt = json!({"condition": {"field": "n", "operator": "gt", "value": 10}});
        assert_eq!(
            run(gt, json!({"n": 11})).await.unwrap()["condition_result"],
            true
        );

        let lt = json!({"condition": {"field": "n", "operator": "lt", "value": 10}});
        assert_eq!(
            run(lt, json!({"n": 11})).await.unwrap()["condition_result"],
            false
        );
    }

    #[tokio::test]
    async fn test_non_comparable_ordering_is_fatal() {
        let config = json!({"condition": {"field": "n", "operator": "gt", "value": 10}});
        let err = run(config, json!({"n": null})).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_contains_string_and_array() {
        let config = json!({"condition": {"field": "tags", "operator": "contains", "value": "a"}});
        assert_eq!(
            run(config.clone(), json!({"tags": ["a", "b"]})).await.unwrap()["condition_result"],
            true
        );
        assert_eq!(
            run(config.clone(), json!({"tags": "cab"})).await.unwrap()["condition_result"],
            true
        );
        assert_eq!(
            run(config, json!({"tags": null})).await.unwrap()["condition_result"],
            false
        );
    }

    #[tokio::test]
    async fn test_exists() {
        let config = json!({"condition": {"field": "k", "operator": "exists"}});
        assert_eq!(
            run(config.clone(), json!({"k": null})).await.unwrap()["condition_result"],
            true
        );
        assert_eq!(
            run(config, json!({})).await.unwrap()["condition_result"],
            false
        );
    }

    #[tokio::test]
    async fn test_unknown_operator_is_fatal() {
        let config = json!({"condition": {"field": "k", "operator": "regex"}});
        let err = run(config, json!({})).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
