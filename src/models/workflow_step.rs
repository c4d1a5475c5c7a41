use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// WorkflowStep is one typed task in a workflow definition.
/// Maps to the `flowline_workflow_steps` table; `(workflow_id, step_order)`
/// is unique and active definitions must form a dense prefix from 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowStep {
    pub step_id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    pub task_type: String,
    pub step_order: i32,
    pub config: serde_json::Value,
    pub timeout_seconds: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New WorkflowStep for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflowStep {
    pub workflow_id: Uuid,
    pub name: String,
    pub task_type: String,
    pub step_order: i32,
    pub config: serde_json::Value,
    pub timeout_seconds: i32,
    pub max_retries: i32,
}

impl WorkflowStep {
    /// Create a new workflow step
    pub async fn create(
        pool: &PgPool,
        new_step: NewWorkflowStep,
    ) -> Result<WorkflowStep, sqlx::Error> {
        let step = sqlx::query_as::<_, WorkflowStep>(
            r#"
            INSERT INTO flowline_workflow_steps
                (workflow_id, name, task_type, step_order, config, timeout_seconds, max_retries)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING step_id, workflow_id, name, task_type, step_order, config,
                      timeout_seconds, max_retries, created_at, updated_at
            "#,
        )
        .bind(new_step.workflow_id)
        .bind(&new_step.name)
        .bind(&new_step.task_type)
        .bind(new_step.step_order)
        .bind(&new_step.config)
        .bind(new_step.timeout_seconds)
        .bind(new_step.max_retries)
        .fetch_one(pool)
        .await?;

        Ok(step)
    }

    /// Find a workflow step by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<WorkflowStep>, sqlx::Error> {
        let step = sqlx::query_as::<_, WorkflowStep>(
            r#"
            SELECT step_id, workflow_id, name, task_type, step_order, config,
                   timeout_seconds, max_retries, created_at, updated_at
            FROM flowline_workflow_steps
            WHERE step_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(step)
    }

    /// List the ordered steps of a workflow
    pub async fn list_by_workflow(
        pool: &PgPool,
        workflow_id: Uuid,
    ) -> Result<Vec<WorkflowStep>, sqlx::Error> {
        let steps = sqlx::query_as::<_, WorkflowStep>(
            r#"
            SELECT step_id, workflow_id, name, task_type, step_order, config,
                   timeout_seconds, max_retries, created_at, updated_at
            FROM flowline_workflow_steps
            WHERE workflow_id = $1
            ORDER BY step_order
            "#,
        )
        .bind(workflow_id)
        .fetch_all(pool)
        .await?;

        Ok(steps)
    }
}

/// Check that an ordered step list forms a dense prefix starting at 0.
/// The execution plan is only valid over dense orderings.
pub fn is_dense_ordering(steps: &[WorkflowStep]) -> bool {
    steps
        .iter()
        .enumerate()
        .all(|(i, step)| step.step_order == i as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_with_order(step_order: i32) -> WorkflowStep {
        WorkflowStep {
            step_id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            name: format!("step-{step_order}"),
            task_type: "log".to_string(),
            step_order,
            config: serde_json::json!({}),
            timeout_seconds: 300,
            max_retries: 3,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_dense_ordering() {
        assert!(is_dense_ordering(&[]));
        assert!(is_dense_ordering(&[step_with_order(0)]));
        assert!(is_dense_ordering(&[
            step_with_order(0),
            step_with_order(1),
            step_with_order(2)
        ]));
    }

    #[test]
    fn test_gapped_ordering_rejected() {
        assert!(!is_dense_ordering(&[step_with_order(1)]));
        assert!(!is_dense_ordering(&[step_with_order(0), step_with_order(2)]));
    }
}
