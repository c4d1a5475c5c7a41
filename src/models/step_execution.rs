use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const STEP_EXECUTION_COLUMNS: &str = "step_execution_id, execution_id, step_id, step_order, \
     status, attempt_number, input_data, output_data, error_message, error_details, \
     started_at, completed_at, created_at, updated_at";

/// StepExecution is one attempt at one step within one execution.
/// A retry creates a new row with `attempt_number + 1`; settled rows are
/// never mutated back to life. For a given `(execution_id, step_order)` the
/// highest attempt is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StepExecution {
    pub step_execution_id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Uuid,
    pub step_order: i32,
    pub status: String,
    pub attempt_number: i32,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New StepExecution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStepExecution {
    pub execution_id: Uuid,
    pub step_id: Uuid,
    pub step_order: i32,
    pub attempt_number: i32,
    pub input_data: serde_json::Value,
}

impl StepExecution {
    /// Create a new attempt row in `pending`
    pub async fn create(
        pool: &PgPool,
        new_attempt: NewStepExecution,
    ) -> Result<StepExecution, sqlx::Error> {
        let attempt = sqlx::query_as::<_, StepExecution>(&format!(
            r#"
            INSERT INTO flowline_step_executions
                (execution_id, step_id, step_order, attempt_number, input_data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {STEP_EXECUTION_COLUMNS}
            "#
        ))
        .bind(new_attempt.execution_id)
        .bind(new_attempt.step_id)
        .bind(new_attempt.step_order)
        .bind(new_attempt.attempt_number)
        .bind(&new_attempt.input_data)
        .fetch_one(pool)
        .await?;

        Ok(attempt)
    }

    /// Count prior attempts at a step within an execution
    pub async fn count_attempts(
        pool: &PgPool,
        execution_id: Uuid,
        step_order: i32,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM flowline_step_executions
            WHERE execution_id = $1 AND step_order = $2
            "#,
        )
        .bind(execution_id)
        .bind(step_order)
        .fetch_one(pool)
        .await?;

        Ok(count.0)
    }

    /// List all attempts for an execution, in step then attempt order
    pub async fn list_by_execution(
        pool: &PgPool,
        execution_id: Uuid,
    ) -> Result<Vec<StepExecution>, sqlx::Error> {
        let attempts = sqlx::query_as::<_, StepExecution>(&format!(
            r#"
            SELECT {STEP_EXECUTION_COLUMNS}
            FROM flowline_step_executions
            WHERE execution_id = $1
            ORDER BY step_order, attempt_number
            "#
        ))
        .bind(execution_id)
        .fetch_all(pool)
        .await?;

        Ok(attempts)
    }

    /// Output of the most recent completed step, if any. This is the
    /// authoritative input for the next step on resume.
    pub async fn latest_completed_output(
        pool: &PgPool,
        execution_id: Uuid,
    ) -> Result<Option<serde_json::Value>, sqlx::Error> {
        let row: Option<(Option<serde_json::Value>,)> = sqlx::query_as(
            r#"
            SELECT output_data
            FROM flowline_step_executions
            WHERE execution_id = $1 AND status = 'completed'
            ORDER BY step_order DESC, attempt_number DESC
            LIMIT 1
            "#,
        )
        .bind(execution_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.and_then(|(output,)| output))
    }

    /// `pending -> running`; stamps `started_at`
    pub async fn mark_running(pool: &PgPool, id: Uuid) -> Result<Option<StepExecution>, sqlx::Error> {
        let attempt = sqlx::query_as::<_, StepExecution>(&format!(
            r#"
            UPDATE flowline_step_executions
            SET status = 'running', started_at = now(), updated_at = now()
            WHERE step_execution_id = $1 AND status = 'pending'
            RETURNING {STEP_EXECUTION_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(attempt)
    }

    /// `running -> failed` with the structured handler outcome
    pub async fn mark_failed(
        pool: &PgPool,
        id: Uuid,
        error_message: &str,
        error_details: Option<&serde_json::Value>,
    ) -> Result<Option<StepExecution>, sqlx::Error> {
        let attempt = sqlx::query_as::<_, StepExecution>(&format!(
            r#"
            UPDATE flowline_step_executions
            SET status = 'failed',
                error_message = $2,
                error_details = $3,
                completed_at = now(),
                updated_at = now()
            WHERE step_execution_id = $1 AND status = 'running'
            RETURNING {STEP_EXECUTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(error_message)
        .bind(error_details)
        .fetch_optional(pool)
        .await?;

        Ok(attempt)
    }

    /// `pending|running -> skipped`, used when cancellation is observed and
    /// the attempt's outcome is discarded
    pub async fn mark_skipped(
        pool: &PgPool,
        id: Uuid,
        reason: &str,
    ) -> Result<Option<StepExecution>, sqlx::Error> {
        let attempt = sqlx::query_as::<_, StepExecution>(&format!(
            r#"
            UPDATE flowline_step_executions
            SET status = 'skipped',
                error_message = $2,
                completed_at = now(),
                updated_at = now()
            WHERE step_execution_id = $1 AND status IN ('pending', 'running')
            RETURNING {STEP_EXECUTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(reason)
        .fetch_optional(pool)
        .await?;

        Ok(attempt)
    }

    /// The checkpoint write: settle the attempt `running -> completed` and
    /// advance the execution cursor in one transaction.
    ///
    /// Returns false without side effects when either guard misses: the
    /// attempt was settled concurrently, or the execution left `running`
    /// (e.g. cancellation). The caller re-reads and decides.
    pub async fn complete_and_advance(
        pool: &PgPool,
        id: Uuid,
        execution_id: Uuid,
        next_step_order: i32,
        output_data: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let settled = sqlx::query(
            r#"
            UPDATE flowline_step_executions
            SET status = 'completed',
                output_data = $2,
                completed_at = now(),
                updated_at = now()
            WHERE step_execution_id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(output_data)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if settled == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // GREATEST keeps the cursor monotonic even under redelivery races.
        let advanced = sqlx::query(
            r#"
            UPDATE flowline_executions
            SET current_step_order = GREATEST(current_step_order, $2),
                updated_at = now()
            WHERE execution_id = $1 AND status = 'running'
            "#,
        )
        .bind(execution_id)
        .bind(next_step_order)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if advanced == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }
}
