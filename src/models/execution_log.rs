use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::state_machine::LogLevel;

/// ExecutionLog is one append-only audit record for an execution.
/// Rows are immutable once written and served in `(timestamp, log_id)`
/// order; `log_id` is monotonic within a single insert stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionLog {
    pub log_id: i64,
    pub execution_id: Uuid,
    pub step_execution_id: Option<Uuid>,
    pub level: String,
    pub message: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// New ExecutionLog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExecutionLog {
    pub execution_id: Uuid,
    pub step_execution_id: Option<Uuid>,
    pub level: LogLevel,
    pub message: String,
    pub details: serde_json::Value,
}

impl NewExecutionLog {
    pub fn new(execution_id: Uuid, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            execution_id,
            step_execution_id: None,
            level,
            message: message.into(),
            details: serde_json::json!({}),
        }
    }

    pub fn info(execution_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(execution_id, LogLevel::Info, message)
    }

    pub fn warning(execution_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(execution_id, LogLevel::Warning, message)
    }

    pub fn error(execution_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(execution_id, LogLevel::Error, message)
    }

    pub fn for_step(mut self, step_execution_id: Uuid) -> Self {
        self.step_execution_id = Some(step_execution_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

impl ExecutionLog {
    /// Append a log entry
    pub async fn append(pool: &PgPool, entry: NewExecutionLog) -> Result<ExecutionLog, sqlx::Error> {
        let log = sqlx::query_as::<_, ExecutionLog>(
            r#"
            INSERT INTO flowline_execution_logs
                (execution_id, step_execution_id, level, message, details)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING log_id, execution_id, step_execution_id, level, message, details, timestamp
            "#,
        )
        .bind(entry.execution_id)
        .bind(entry.step_execution_id)
        .bind(entry.level.to_string())
        .bind(&entry.message)
        .bind(&entry.details)
        .fetch_one(pool)
        .await?;

        Ok(log)
    }

    /// List logs for an execution in timestamp-then-id order, optionally
    /// filtered by level
    pub async fn list_by_execution(
        pool: &PgPool,
        execution_id: Uuid,
        level: Option<LogLevel>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionLog>, sqlx::Error> {
        let logs = sqlx::query_as::<_, ExecutionLog>(
            r#"
            SELECT log_id, execution_id, step_execution_id, level, message, details, timestamp
            FROM flowline_execution_logs
            WHERE execution_id = $1
              AND ($2::text IS NULL OR level = $2)
            ORDER BY timestamp, log_id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(execution_id)
        .bind(level.map(|l| l.to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_builder() {
        let execution_id = Uuid::new_v4();
        let step_execution_id = Uuid::new_v4();

        let entry = NewExecutionLog::warning(execution_id, "handler attempt failed")
            .for_step(step_execution_id)
            .with_details(serde_json::json!({"attempt": 2}));

        assert_eq!(entry.execution_id, execution_id);
        assert_eq!(entry.step_execution_id, Some(step_execution_id));
        assert_eq!(entry.level, LogLevel::Warning);
        assert_eq!(entry.details["attempt"], 2);
    }
}
