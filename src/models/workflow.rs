use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::EngineError;
use crate::state_machine::WorkflowStatus;

/// Workflow represents a versioned definition template.
/// Maps to the `flowline_workflows` table; `(name, version)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Workflow {
    pub workflow_id: Uuid,
    pub name: String,
    pub description: String,
    pub version: i32,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Workflow for creation (without generated fields)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub name: String,
    pub description: String,
    pub version: i32,
    pub metadata: serde_json::Value,
}

impl Workflow {
    /// Parse the stored status through the workflow state machine
    pub fn parsed_status(&self) -> Result<WorkflowStatus, EngineError> {
        self.status
            .parse()
            .map_err(|_| EngineError::internal(format!("invalid status in store: {}", self.status)))
    }

    /// Create a new workflow in draft status
    pub async fn create(pool: &PgPool, new_workflow: NewWorkflow) -> Result<Workflow, sqlx::Error> {
        let workflow = sqlx::query_as::<_, Workflow>(
            r#"
            INSERT INTO flowline_workflows (name, description, version, metadata)
            VALUES ($1, $2, $3, $4)
            RETURNING workflow_id, name, description, version, status, metadata, created_at, updated_at
            "#,
        )
        .bind(&new_workflow.name)
        .bind(&new_workflow.description)
        .bind(new_workflow.version)
        .bind(&new_workflow.metadata)
        .fetch_one(pool)
        .await?;

        Ok(workflow)
    }

    /// Find a workflow by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Workflow>, sqlx::Error> {
        let workflow = sqlx::query_as::<_, Workflow>(
            r#"
            SELECT workflow_id, name, description, version, status, metadata, created_at, updated_at
            FROM flowline_workflows
            WHERE workflow_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(workflow)
    }

    /// Find the latest version of a workflow by name
    pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<Workflow>, sqlx::Error> {
        let workflow = sqlx::query_as::<_, Workflow>(
            r#"
            SELECT workflow_id, name, description, version, status, metadata, created_at, updated_at
            FROM flowline_workflows
            WHERE name = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(pool)
        .await?;

        Ok(workflow)
    }

    /// Find a specific `(name, version)` pair
    pub async fn find_by_name_version(
        pool: &PgPool,
        name: &str,
        version: i32,
    ) -> Result<Option<Workflow>, sqlx::Error> {
        let workflow = sqlx::query_as::<_, Workflow>(
            r#"
            SELECT workflow_id, name, description, version, status, metadata, created_at, updated_at
            FROM flowline_workflows
            WHERE name = $1 AND version = $2
            "#,
        )
        .bind(name)
        .bind(version)
        .fetch_optional(pool)
        .await?;

        Ok(workflow)
    }

    /// List workflows, optionally filtered by status
    pub async fn list(
        pool: &PgPool,
        status: Option<WorkflowStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Workflow>, sqlx::Error> {
        let workflows = sqlx::query_as::<_, Workflow>(
            r#"
            SELECT workflow_id, name, description, version, status, metadata, created_at, updated_at
            FROM flowline_workflows
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY name, version
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(workflows)
    }

    /// Status-guarded lifecycle transition. Returns `None` when the guard
    /// does not match, meaning a concurrent transition won.
    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<Option<Workflow>, sqlx::Error> {
        let workflow = sqlx::query_as::<_, Workflow>(
            r#"
            UPDATE flowline_workflows
            SET status = $3, updated_at = now()
            WHERE workflow_id = $1 AND status = $2
            RETURNING workflow_id, name, description, version, status, metadata, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_optional(pool)
        .await?;

        Ok(workflow)
    }

    /// Count executions referencing this workflow
    pub async fn execution_count(pool: &PgPool, id: Uuid) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM flowline_executions WHERE workflow_id = $1",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;

        Ok(count.0)
    }
}
