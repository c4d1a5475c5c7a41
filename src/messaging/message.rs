//! Queue message envelope for execution dispatch.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::QueueResult;

/// Why an execution was (re-)enqueued. Recorded for observability; delivery
/// handling does not branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueReason {
    /// Fresh admission
    Trigger,
    /// Execution-level retry (delayed)
    Retry,
    /// Operator-initiated retry
    OperatorRetry,
    /// Sweeper recovery of a stuck or undelivered execution
    Sweeper,
}

/// The payload delivered to workers: which execution to drive.
///
/// Deliveries are at-least-once; a duplicate observes a non-admissible
/// execution state and no-ops, so the envelope carries no dedup state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMessage {
    pub execution_id: Uuid,
    pub reason: EnqueueReason,
}

impl ExecutionMessage {
    pub fn new(execution_id: Uuid, reason: EnqueueReason) -> Self {
        Self {
            execution_id,
            reason,
        }
    }

    /// Serialize for queue transport
    pub fn to_json(&self) -> QueueResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize from queue transport
    pub fn from_json(value: serde_json::Value) -> QueueResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_round_trip() {
        let message = ExecutionMessage::new(Uuid::new_v4(), EnqueueReason::Retry);
        let json = message.to_json().unwrap();
        assert_eq!(json["reason"], "retry");

        let parsed = ExecutionMessage::from_json(json).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_malformed_message_rejected() {
        let result = ExecutionMessage::from_json(serde_json::json!({"bogus": true}));
        assert!(result.is_err());
    }
}
