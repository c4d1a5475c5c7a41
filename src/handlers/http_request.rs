//! HTTP request handler.
//!
//! Config schema:
//! ```json
//! {
//!   "url": "https://api.example.com/orders/{order_id}",
//!   "method": "GET" | "POST" | "PUT" | "DELETE" | ...,
//!   "headers": {"key": "value"},
//!   "body": {...},
//!   "expected_status": [200, 201]
//! }
//! ```
//!
//! `{key}` placeholders in the URL are substituted from the input map.
//! Transport faults, timeouts, and 408/429/5xx responses are retryable;
//! malformed configuration and other unexpected statuses are fatal.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{render_template, HandlerError, HandlerResult, TaskHandler};

const DEFAULT_EXPECTED_STATUS: &[u16] = &[200, 201, 204];

pub struct HttpRequestHandler {
    client: reqwest::Client,
}

impl HttpRequestHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHandler for HttpRequestHandler {
    fn task_type(&self) -> &str {
        "http_request"
    }

    async fn execute(&self, config: &Value, input: &Value, timeout: Duration) -> HandlerResult {
        let url_template = config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::fatal("http_request config requires a 'url' string"))?;
        let url = render_template(url_template, input);

        let method_str = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = Method::from_bytes(method_str.as_bytes())
            .map_err(|_| HandlerError::fatal(format!("invalid HTTP method: {method_str}")))?;

        let expected_status: Vec<u16> = match config.get("expected_status") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                HandlerError::fatal(format!("invalid expected_status list: {e}"))
            })?,
            None => DEFAULT_EXPECTED_STATUS.to_vec(),
        };

        let mut request = self.client.request(method.clone(), &url).timeout(timeout);

        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let value_str = value.as_str().ok_or_else(|| {
                    HandlerError::fatal(format!("header '{name}' must be a string"))
                })?;
                request = request.header(name.as_str(), value_str);
            }
        }

        if let Some(body) = config.get("body") {
            if !body.is_null() {
                request = request.json(body);
            }
        }

        debug!(%method, %url, "dispatching http request");

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(classify_transport_error)?;

        if !expected_status.contains(&status) {
            let details = json!({"status_code": status, "body": text});
            let message = format!("HTTP request returned unexpected status {status}");
            // Server-side and throttling statuses are worth another attempt
            return if status == 408 || status == 429 || status >= 500 {
                Err(HandlerError::retryable_with(message, details))
            } else {
                Err(HandlerError::fatal_with(message, details))
            };
        }

        let response_data =
            serde_json::from_str::<Value>(&text).unwrap_or_else(|_| json!({"text": text}));

        Ok(json!({
            "status_code": status,
            "response": response_data,
        }))
    }
}

fn classify_transport_error(err: reqwest::Error) -> HandlerError {
    if err.is_builder() || err.is_request() {
        HandlerError::fatal(format!("HTTP request could not be built: {err}"))
    } else {
        // timeouts, connection resets, DNS failures
        HandlerError::retryable(format!("HTTP transport error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> HttpRequestHandler {
        HttpRequestHandler::new()
    }

    #[tokio::test]
    async fn test_missing_url_is_fatal() {
        let err = handler()
            .execute(&json!({}), &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("url"));
    }

    #[tokio::test]
    async fn test_invalid_method_is_fatal() {
        let config = json!({"url": "http://localhost/", "method": "NOT A METHOD"});
        let err = handler()
            .execute(&config, &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_non_string_header_is_fatal() {
        let config = json!({
            "url": "http://localhost/",
            "headers": {"x-count": 3}
        });
        let err = handler()
            .execute(&config, &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("x-count"));
    }

    #[tokio::test]
    async fn test_malformed_expected_status_is_fatal() {
        let config = json!({"url": "http://localhost/", "expected_status": "200"});
        let err = handler()
            .execute(&config, &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_error_classification_shapes() {
        // Status-based classification is pure; spot-check the split points.
        for status in [500u16, 503, 429, 408] {
            assert!(status == 408 || status == 429 || status >= 500);
        }
        for status in [400u16, 403, 404, 410] {
            assert!(!(status == 408 || status == 429 || status >= 500));
        }
    }
}
