use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::EngineError;
use crate::state_machine::ExecutionStatus;

const EXECUTION_COLUMNS: &str = "execution_id, workflow_id, idempotency_key, status, \
     current_step_order, retry_count, max_retries, input_data, output_data, error_message, \
     scheduled_at, started_at, completed_at, created_at, updated_at";

/// Execution is one durable attempt to run a workflow against an input.
/// Maps to the `flowline_executions` table; `(workflow_id, idempotency_key)`
/// is unique so concurrent triggers collapse onto a single row.
///
/// Every state change below is a single-statement update guarded on the
/// current status. A `None` return means a concurrent transition won and
/// the caller should re-read and decide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Execution {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub idempotency_key: String,
    pub status: String,
    pub current_step_order: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Execution for admission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExecution {
    pub workflow_id: Uuid,
    pub idempotency_key: String,
    pub input_data: serde_json::Value,
    pub max_retries: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Parse the stored status through the execution state machine
    pub fn parsed_status(&self) -> Result<ExecutionStatus, EngineError> {
        self.status
            .parse()
            .map_err(|_| EngineError::internal(format!("invalid status in store: {}", self.status)))
    }

    /// Whether the execution has settled for good
    pub fn is_terminal(&self) -> bool {
        self.parsed_status().map(|s| s.is_terminal()).unwrap_or(false)
    }

    /// Admission with first-insert-wins semantics.
    ///
    /// Returns `(execution, created)`. When a row with the same
    /// `(workflow_id, idempotency_key)` already exists, the existing row is
    /// returned unchanged and `created` is false; racing inserters lose the
    /// conflict and re-read the winner.
    pub async fn insert_idempotent(
        pool: &PgPool,
        new_execution: NewExecution,
    ) -> Result<(Execution, bool), sqlx::Error> {
        let inserted = sqlx::query_as::<_, Execution>(&format!(
            r#"
            INSERT INTO flowline_executions
                (workflow_id, idempotency_key, input_data, max_retries, scheduled_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT ON CONSTRAINT flowline_executions_idempotency_key DO NOTHING
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(new_execution.workflow_id)
        .bind(&new_execution.idempotency_key)
        .bind(&new_execution.input_data)
        .bind(new_execution.max_retries)
        .bind(new_execution.scheduled_at)
        .fetch_optional(pool)
        .await?;

        if let Some(execution) = inserted {
            return Ok((execution, true));
        }

        // Lost the race: the winner's row is visible once its insert commits.
        let existing = Self::find_by_key(
            pool,
            new_execution.workflow_id,
            &new_execution.idempotency_key,
        )
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;

        Ok((existing, false))
    }

    /// Find an execution by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Execution>, sqlx::Error> {
        let execution = sqlx::query_as::<_, Execution>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM flowline_executions WHERE execution_id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(execution)
    }

    /// Find an execution by its idempotency pair
    pub async fn find_by_key(
        pool: &PgPool,
        workflow_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<Execution>, sqlx::Error> {
        let execution = sqlx::query_as::<_, Execution>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM flowline_executions
            WHERE workflow_id = $1 AND idempotency_key = $2
            "#
        ))
        .bind(workflow_id)
        .bind(idempotency_key)
        .fetch_optional(pool)
        .await?;

        Ok(execution)
    }

    /// List executions with optional workflow/status filters
    pub async fn list(
        pool: &PgPool,
        workflow_id: Option<Uuid>,
        status: Option<ExecutionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Execution>, sqlx::Error> {
        let executions = sqlx::query_as::<_, Execution>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM flowline_executions
            WHERE ($1::uuid IS NULL OR workflow_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(workflow_id)
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(executions)
    }

    /// `pending|retrying -> running`; stamps `started_at` on first entry
    pub async fn mark_running(pool: &PgPool, id: Uuid) -> Result<Option<Execution>, sqlx::Error> {
        let execution = sqlx::query_as::<_, Execution>(&format!(
            r#"
            UPDATE flowline_executions
            SET status = 'running',
                started_at = COALESCE(started_at, now()),
                updated_at = now()
            WHERE execution_id = $1 AND status IN ('pending', 'retrying')
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(execution)
    }

    /// `running -> completed` with the final output
    pub async fn mark_completed(
        pool: &PgPool,
        id: Uuid,
        output_data: &serde_json::Value,
    ) -> Result<Option<Execution>, sqlx::Error> {
        let execution = sqlx::query_as::<_, Execution>(&format!(
            r#"
            UPDATE flowline_executions
            SET status = 'completed',
                output_data = $2,
                completed_at = now(),
                updated_at = now()
            WHERE execution_id = $1 AND status = 'running'
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(output_data)
        .fetch_optional(pool)
        .await?;

        Ok(execution)
    }

    /// `running -> failed` recording the terminal cause.
    ///
    /// `completed_at` is stamped here; a follow-up retry transition clears
    /// it again, so a settled `failed` row always carries the stamp.
    pub async fn mark_failed(
        pool: &PgPool,
        id: Uuid,
        error_message: &str,
    ) -> Result<Option<Execution>, sqlx::Error> {
        let execution = sqlx::query_as::<_, Execution>(&format!(
            r#"
            UPDATE flowline_executions
            SET status = 'failed',
                error_message = $2,
                completed_at = now(),
                updated_at = now()
            WHERE execution_id = $1 AND status = 'running'
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(error_message)
        .fetch_optional(pool)
        .await?;

        Ok(execution)
    }

    /// `failed -> retrying`, consuming one unit of the retry budget.
    ///
    /// The guard enforces the budget: once `retry_count` reaches
    /// `max_retries` this update matches zero rows.
    pub async fn mark_retrying(
        pool: &PgPool,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Option<Execution>, sqlx::Error> {
        let execution = sqlx::query_as::<_, Execution>(&format!(
            r#"
            UPDATE flowline_executions
            SET status = 'retrying',
                retry_count = retry_count + 1,
                scheduled_at = $2,
                completed_at = NULL,
                updated_at = now()
            WHERE execution_id = $1 AND status = 'failed' AND retry_count < max_retries
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(scheduled_at)
        .fetch_optional(pool)
        .await?;

        Ok(execution)
    }

    /// `any non-terminal -> cancelled`
    pub async fn mark_cancelled(pool: &PgPool, id: Uuid) -> Result<Option<Execution>, sqlx::Error> {
        let execution = sqlx::query_as::<_, Execution>(&format!(
            r#"
            UPDATE flowline_executions
            SET status = 'cancelled',
                completed_at = now(),
                updated_at = now()
            WHERE execution_id = $1 AND status IN ('pending', 'running', 'failed', 'retrying')
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(execution)
    }

    /// Crash recovery: flip `running` rows whose `updated_at` went stale
    /// back to `retrying` so they can be re-dispatched. Does not consume
    /// retry budget; a lost lease is not a failure.
    pub async fn sweep_stuck(
        pool: &PgPool,
        stale_after_seconds: f64,
    ) -> Result<Vec<Execution>, sqlx::Error> {
        let executions = sqlx::query_as::<_, Execution>(&format!(
            r#"
            UPDATE flowline_executions
            SET status = 'retrying',
                scheduled_at = now(),
                updated_at = now()
            WHERE status = 'running'
              AND updated_at < now() - make_interval(secs => $1)
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(stale_after_seconds)
        .fetch_all(pool)
        .await?;

        Ok(executions)
    }

    /// Retrying rows whose schedule has lapsed without a fresh delivery.
    /// These lost their retry enqueue and need re-dispatch.
    pub async fn list_stale_retrying(
        pool: &PgPool,
        older_than_seconds: f64,
    ) -> Result<Vec<Execution>, sqlx::Error> {
        let executions = sqlx::query_as::<_, Execution>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM flowline_executions
            WHERE status = 'retrying'
              AND (scheduled_at IS NULL OR scheduled_at <= now())
              AND updated_at < now() - make_interval(secs => $1)
            ORDER BY updated_at
            "#
        ))
        .bind(older_than_seconds)
        .fetch_all(pool)
        .await?;

        Ok(executions)
    }

    /// Pending rows that are due but were admitted longer ago than the
    /// threshold. These lost their enqueue (crash between commit and send)
    /// and need re-dispatch.
    pub async fn list_stale_pending(
        pool: &PgPool,
        older_than_seconds: f64,
    ) -> Result<Vec<Execution>, sqlx::Error> {
        let executions = sqlx::query_as::<_, Execution>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM flowline_executions
            WHERE status = 'pending'
              AND (scheduled_at IS NULL OR scheduled_at <= now())
              AND created_at < now() - make_interval(secs => $1)
            ORDER BY created_at
            "#
        ))
        .bind(older_than_seconds)
        .fetch_all(pool)
        .await?;

        Ok(executions)
    }
}
