//! Data transformation handler.
//!
//! Config schema:
//! ```json
//! {
//!   "transforms": [
//!     {"type": "rename", "from": "old_key", "to": "new_key"},
//!     {"type": "extract", "key": "nested.path", "as": "new_key"},
//!     {"type": "set", "key": "key", "value": "static_value"},
//!     {"type": "delete", "keys": ["key1", "key2"]}
//!   ]
//! }
//! ```
//!
//! Transforms apply in order over a copy of the input map. Configuration
//! mistakes are fatal; there is nothing transient to retry.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use super::{HandlerError, HandlerResult, TaskHandler};

pub struct DataTransformHandler;

#[async_trait]
impl TaskHandler for DataTransformHandler {
    fn task_type(&self) -> &str {
        "data_transform"
    }

    async fn execute(&self, config: &Value, input: &Value, _timeout: Duration) -> HandlerResult {
        let mut result = input
            .as_object()
            .cloned()
            .ok_or_else(|| HandlerError::fatal("data_transform input must be an object"))?;

        let transforms = match config.get("transforms") {
            Some(value) => value
                .as_array()
                .ok_or_else(|| HandlerError::fatal("'transforms' must be an array"))?
                .as_slice(),
            None => &[],
        };

        for transform in transforms {
            apply_transform(&mut result, transform)?;
        }

        Ok(Value::Object(result))
    }
}

fn apply_transform(result: &mut Map<String, Value>, transform: &Value) -> Result<(), HandlerError> {
    let transform_type = transform
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::fatal("transform requires a 'type' string"))?;

    match transform_type {
        "rename" => {
            let from = require_str(transform, "from")?;
            let to = require_str(transform, "to")?;
            if let Some(value) = result.remove(from) {
                result.insert(to.to_string(), value);
            }
        }
        "extract" => {
            let key_path = require_str(transform, "key")?;
            let as_key = transform
                .get("as")
                .and_then(Value::as_str)
                .unwrap_or_else(|| key_path.rsplit('.').next().unwrap_or(key_path));
            if let Some(value) = get_nested(result, key_path) {
                result.insert(as_key.to_string(), value);
            }
        }
        "set" => {
            let key = require_str(transform, "key")?;
            let value = transform
                .get("value")
                .ok_or_else(|| HandlerError::fatal("set transform requires a 'value'"))?;
            result.insert(key.to_string(), value.clone());
        }
        "delete" => {
            let keys = transform
                .get("keys")
                .and_then(Value::as_array)
                .ok_or_else(|| HandlerError::fatal("delete transform requires a 'keys' array"))?;
            for key in keys {
                if let Some(key) = key.as_str() {
                    result.remove(key);
                }
            }
        }
        other => {
            return Err(HandlerError::fatal(format!(
                "unknown transform type: {other}"
            )))
        }
    }

    Ok(())
}

fn require_str<'a>(transform: &'a Value, field: &str) -> Result<&'a str, HandlerError> {
    transform
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::fatal(format!("transform requires a '{field}' string")))
}

/// Resolve a dot-separated path against the map
fn get_nested(map: &Map<String, Value>, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn run(config: Value, input: Value) -> HandlerResult {
        DataTransformHandler
            .execute(&config, &input, Duration::from_secs(1))
            .await
    }

    #[tokio::test]
    async fn test_rename() {
        let config = json!({"transforms": [{"type": "rename", "from": "a", "to": "b"}]});
        let output = run(config, json!({"a": 1, "c": 2})).await.unwrap();
        assert_eq!(output, json!({"b": 1, "c": 2}));
    }

    #[tokio::test]
    async fn test_rename_missing_key_is_noop() {
        let config = json!({"transforms": [{"type": "rename", "from": "nope", "to": "b"}]});
        let output = run(config, json!({"a": 1})).await.unwrap();
        assert_eq!(output, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_extract_nested_path() {
        let config = json!({"transforms": [{"type": "extract", "key": "user.address.city"}]});
        let input = json!({"user": {"address": {"city": "Lisbon"}}});
        let output = run(config, input).await.unwrap();
        assert_eq!(output["city"], "Lisbon");
    }

    #[tokio::test]
    async fn test_extract_with_alias() {
        let config =
            json!({"transforms": [{"type": "extract", "key": "user.name", "as": "username"}]});
        let output = run(config, json!({"user": {"name": "ada"}})).await.unwrap();
        assert_eq!(output["username"], "ada");
    }

    #[tokio::test]
    async fn test_set_and_delete() {
        let config = json!({"transforms": [
            {"type": "set", "key": "env", "value": "prod"},
            {"type": "delete", "keys": ["secret"]}
        ]});
        let output = run(config, json!({"secret": "x", "keep": true})).await.unwrap();
        assert_eq!(output, json!({"env": "prod", "keep": true}));
    }

    #[tokio::test]
    async fn test_transforms_apply_in_order() {
        let config = json!({"transforms": [
            {"type": "set", "key": "a", "value": 1},
            {"type": "rename", "from": "a", "to": "b"}
        ]});
        let output = run(config, json!({})).await.unwrap();
        assert_eq!(output, json!({"b": 1}));
    }

    #[tokio::test]
    async fn test_unknown_transform_is_fatal() {
        let config = json!({"transforms": [{"type": "explode"}]});
        let err = run(config, json!({})).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("explode"));
    }

    #[tokio::test]
    async fn test_non_object_input_is_fatal() {
        let err = run(json!({}), json!([1, 2])).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_no_transforms_passes_input_through() {
        let output = run(json!({}), json!({"k": "v"})).await.unwrap();
        assert_eq!(output, json!({"k": "v"}));
    }
}
