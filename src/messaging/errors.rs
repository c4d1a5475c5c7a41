//! Error types for the delivery queue.

use thiserror::Error;

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur in queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    /// Database connection or query errors
    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Message payload serialization/deserialization errors
    #[error("Message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A payload that does not parse as an engine message
    #[error("Invalid message in queue {queue_name} (msg_id {msg_id}): {reason}")]
    InvalidMessage {
        queue_name: String,
        msg_id: i64,
        reason: String,
    },
}

impl QueueError {
    /// Create an invalid-message error
    pub fn invalid_message(
        queue_name: impl Into<String>,
        msg_id: i64,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidMessage {
            queue_name: queue_name.into(),
            msg_id,
            reason: reason.into(),
        }
    }
}
