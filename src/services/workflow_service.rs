//! Workflow definition management: create, shape, activate, retire.

use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::error::{map_unique_violation, EngineError, Result};
use crate::models::{
    is_dense_ordering, NewWorkflow, NewWorkflowStep, Workflow, WorkflowStep,
};
use crate::state_machine::{validate_workflow_transition, WorkflowStatus};

/// Request to add a step to a draft workflow
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: String,
    pub task_type: String,
    pub step_order: i32,
    pub config: serde_json::Value,
    pub timeout_seconds: i32,
    pub max_retries: i32,
}

/// Service for managing workflow definitions
#[derive(Clone)]
pub struct WorkflowService {
    pool: PgPool,
}

impl WorkflowService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new workflow definition in draft status.
    /// `(name, version)` must be globally unique.
    pub async fn create_workflow(
        &self,
        name: &str,
        description: &str,
        version: i32,
        metadata: serde_json::Value,
    ) -> Result<Workflow> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("workflow name is required"));
        }
        if version < 1 {
            return Err(EngineError::validation("workflow version must be >= 1"));
        }

        let workflow = Workflow::create(
            &self.pool,
            NewWorkflow {
                name: name.to_string(),
                description: description.to_string(),
                version,
                metadata,
            },
        )
        .await
        .map_err(|e| {
            map_unique_violation(
                e,
                &format!("workflow '{name}' version {version} already exists"),
            )
        })?;

        info!(workflow_id = %workflow.workflow_id, name = %workflow.name, version, "workflow created");
        Ok(workflow)
    }

    /// Add a step to a workflow. Steps are mutable only while the owning
    /// workflow is a draft.
    pub async fn add_step(&self, workflow_id: Uuid, spec: StepSpec) -> Result<WorkflowStep> {
        let workflow = self.get_workflow(workflow_id).await?;
        let status = workflow.parsed_status()?;
        if !status.is_mutable() {
            return Err(EngineError::validation(format!(
                "cannot add steps to a workflow in {status} status"
            )));
        }

        if spec.name.trim().is_empty() {
            return Err(EngineError::validation("step name is required"));
        }
        if spec.task_type.trim().is_empty() {
            return Err(EngineError::validation("task type is required"));
        }
        if spec.step_order < 0 {
            return Err(EngineError::validation("step order must be non-negative"));
        }
        if spec.timeout_seconds <= 0 {
            return Err(EngineError::validation("timeout_seconds must be positive"));
        }
        if spec.max_retries < 0 {
            return Err(EngineError::validation("max_retries must be non-negative"));
        }

        let step = WorkflowStep::create(
            &self.pool,
            NewWorkflowStep {
                workflow_id,
                name: spec.name.trim().to_string(),
                task_type: spec.task_type.trim().to_string(),
                step_order: spec.step_order,
                config: spec.config,
                timeout_seconds: spec.timeout_seconds,
                max_retries: spec.max_retries,
            },
        )
        .await
        .map_err(|e| {
            map_unique_violation(
                e,
                &format!("step order {} already exists", spec.step_order),
            )
        })?;

        info!(%workflow_id, step_order = step.step_order, task_type = %step.task_type, "step added");
        Ok(step)
    }

    /// Activate a workflow so it admits executions. Requires at least one
    /// step and a dense ordering from 0.
    pub async fn activate(&self, workflow_id: Uuid) -> Result<Workflow> {
        let workflow = self.get_workflow(workflow_id).await?;
        let from = workflow.parsed_status()?;
        validate_workflow_transition(from, WorkflowStatus::Active)?;

        let steps = WorkflowStep::list_by_workflow(&self.pool, workflow_id).await?;
        if steps.is_empty() {
            return Err(EngineError::validation(
                "cannot activate a workflow without steps",
            ));
        }
        if !is_dense_ordering(&steps) {
            return Err(EngineError::validation(
                "step orders must form a dense prefix from 0",
            ));
        }

        self.transition(workflow_id, from, WorkflowStatus::Active)
            .await
    }

    /// Mark a workflow deprecated; existing executions keep running
    pub async fn deprecate(&self, workflow_id: Uuid) -> Result<Workflow> {
        let workflow = self.get_workflow(workflow_id).await?;
        let from = workflow.parsed_status()?;
        validate_workflow_transition(from, WorkflowStatus::Deprecated)?;
        self.transition(workflow_id, from, WorkflowStatus::Deprecated)
            .await
    }

    /// Archive a workflow
    pub async fn archive(&self, workflow_id: Uuid) -> Result<Workflow> {
        let workflow = self.get_workflow(workflow_id).await?;
        let from = workflow.parsed_status()?;
        validate_workflow_transition(from, WorkflowStatus::Archived)?;
        self.transition(workflow_id, from, WorkflowStatus::Archived)
            .await
    }

    /// Get a workflow by ID
    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<Workflow> {
        Workflow::find_by_id(&self.pool, workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))
    }

    /// Get the latest version of a workflow by name
    pub async fn get_workflow_by_name(&self, name: &str) -> Result<Workflow> {
        Workflow::find_by_name(&self.pool, name)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", name))
    }

    /// Ordered steps of a workflow
    pub async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStep>> {
        self.get_workflow(workflow_id).await?;
        Ok(WorkflowStep::list_by_workflow(&self.pool, workflow_id).await?)
    }

    /// List workflows with an optional status filter
    pub async fn list(
        &self,
        status: Option<WorkflowStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Workflow>> {
        Ok(Workflow::list(&self.pool, status, limit.max(1), offset.max(0)).await?)
    }

    async fn transition(
        &self,
        workflow_id: Uuid,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<Workflow> {
        match Workflow::update_status(&self.pool, workflow_id, from, to).await? {
            Some(workflow) => {
                info!(%workflow_id, %from, %to, "workflow status changed");
                Ok(workflow)
            }
            // Guard missed: someone transitioned it first. Re-read so the
            // error names the actual state.
            None => {
                let current = self.get_workflow(workflow_id).await?;
                Err(EngineError::invalid_transition(
                    "workflow",
                    current.status,
                    to,
                ))
            }
        }
    }
}
