//! Execution admission and lifecycle operations.

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::messaging::{EnqueueReason, ExecutionMessage, QueueClient};
use crate::models::{Execution, ExecutionLog, NewExecution, NewExecutionLog};
use crate::state_machine::{ExecutionStatus, LogLevel};

/// Result of a trigger: the (possibly pre-existing) execution and whether
/// this call admitted it
#[derive(Debug, Clone)]
pub struct TriggerResult {
    pub execution: Execution,
    pub created: bool,
}

/// Request to trigger an execution
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub workflow_id: Uuid,
    pub idempotency_key: String,
    pub input_data: serde_json::Value,
    pub max_retries: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Service for managing workflow executions
#[derive(Clone)]
pub struct ExecutionService {
    pool: PgPool,
    queue: QueueClient,
}

impl ExecutionService {
    pub fn new(pool: PgPool, queue: QueueClient) -> Self {
        Self { pool, queue }
    }

    /// Admit an execution. At most one live execution exists per
    /// `(workflow_id, idempotency_key)`: a repeated trigger returns the
    /// existing row unchanged and does not enqueue a duplicate.
    ///
    /// If the enqueue fails after the row is committed, the trigger still
    /// succeeds; the sweeper re-dispatches stale pending rows.
    pub async fn trigger(&self, request: TriggerRequest) -> Result<TriggerResult> {
        if request.idempotency_key.trim().is_empty() {
            return Err(EngineError::validation("idempotency_key is required"));
        }
        if request.max_retries < 0 {
            return Err(EngineError::validation("max_retries must be non-negative"));
        }

        let workflow = crate::models::Workflow::find_by_id(&self.pool, request.workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", request.workflow_id))?;
        let workflow_status = workflow.parsed_status()?;
        if !workflow_status.admits_executions() {
            return Err(EngineError::WorkflowNotActive {
                workflow_id: request.workflow_id,
                status: workflow.status.clone(),
            });
        }

        let (execution, created) = Execution::insert_idempotent(
            &self.pool,
            NewExecution {
                workflow_id: request.workflow_id,
                idempotency_key: request.idempotency_key.clone(),
                input_data: request.input_data,
                max_retries: request.max_retries,
                scheduled_at: request.scheduled_at,
            },
        )
        .await?;

        if !created {
            info!(
                execution_id = %execution.execution_id,
                idempotency_key = %request.idempotency_key,
                "trigger matched existing execution"
            );
            return Ok(TriggerResult { execution, created });
        }

        self.append_log(
            NewExecutionLog::info(execution.execution_id, "execution admitted").with_details(
                json!({
                    "workflow_id": request.workflow_id,
                    "idempotency_key": request.idempotency_key,
                }),
            ),
        )
        .await?;

        let message = ExecutionMessage::new(execution.execution_id, EnqueueReason::Trigger);
        let enqueued = match request.scheduled_at {
            Some(deliver_at) => self.queue.send_at(&message, deliver_at).await,
            None => self.queue.send(&message, None).await,
        };
        if let Err(e) = enqueued {
            warn!(
                execution_id = %execution.execution_id,
                error = %e,
                "enqueue failed after admission, deferring to sweeper"
            );
        }

        info!(
            execution_id = %execution.execution_id,
            workflow_id = %request.workflow_id,
            "execution admitted"
        );
        Ok(TriggerResult { execution, created })
    }

    /// Get an execution by ID
    pub async fn get(&self, execution_id: Uuid) -> Result<Execution> {
        Execution::find_by_id(&self.pool, execution_id)
            .await?
            .ok_or_else(|| EngineError::not_found("execution", execution_id))
    }

    /// Cancel an execution from any non-terminal state. A running worker
    /// observes the change at its next step boundary.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<Execution> {
        match Execution::mark_cancelled(&self.pool, execution_id).await? {
            Some(execution) => {
                info!(%execution_id, "execution cancelled");
                self.append_log(NewExecutionLog::info(
                    execution_id,
                    "execution cancelled by operator",
                ))
                .await?;
                Ok(execution)
            }
            None => {
                let current = self.get(execution_id).await?;
                Err(EngineError::invalid_transition(
                    "execution",
                    current.status,
                    ExecutionStatus::Cancelled,
                ))
            }
        }
    }

    /// Operator retry of a failed execution. Counts against the retry
    /// budget (`retry_count` is not reset) and re-enqueues immediately.
    pub async fn retry(&self, execution_id: Uuid) -> Result<Execution> {
        match Execution::mark_retrying(&self.pool, execution_id, Utc::now()).await? {
            Some(execution) => {
                info!(
                    %execution_id,
                    retry_count = execution.retry_count,
                    max_retries = execution.max_retries,
                    "operator retry initiated"
                );
                self.append_log(
                    NewExecutionLog::info(
                        execution_id,
                        format!(
                            "operator retry initiated ({} of {})",
                            execution.retry_count, execution.max_retries
                        ),
                    )
                    .with_details(json!({"retry_count": execution.retry_count})),
                )
                .await?;

                let message = ExecutionMessage::new(execution_id, EnqueueReason::OperatorRetry);
                if let Err(e) = self.queue.send(&message, None).await {
                    warn!(%execution_id, error = %e, "retry enqueue failed, deferring to sweeper");
                }
                Ok(execution)
            }
            None => {
                // Either not failed, or the budget is spent
                let current = self.get(execution_id).await?;
                let status = current.parsed_status()?;
                if status == ExecutionStatus::Failed {
                    // Failed but the budget is spent: the FSM edge is gated
                    // on retry_count < max_retries
                    Err(EngineError::invalid_transition(
                        "execution",
                        format!(
                            "failed (retry budget exhausted, {} of {})",
                            current.retry_count, current.max_retries
                        ),
                        ExecutionStatus::Retrying,
                    ))
                } else {
                    Err(EngineError::invalid_transition(
                        "execution",
                        current.status,
                        ExecutionStatus::Retrying,
                    ))
                }
            }
        }
    }

    /// List executions with optional filters
    pub async fn list(
        &self,
        workflow_id: Option<Uuid>,
        status: Option<ExecutionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Execution>> {
        Ok(Execution::list(
            &self.pool,
            workflow_id,
            status,
            limit.max(1),
            offset.max(0),
        )
        .await?)
    }

    /// Audit log for an execution, ordered by timestamp then insertion,
    /// optionally filtered by level
    pub async fn list_logs(
        &self,
        execution_id: Uuid,
        level: Option<LogLevel>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionLog>> {
        self.get(execution_id).await?;
        Ok(ExecutionLog::list_by_execution(
            &self.pool,
            execution_id,
            level,
            limit.max(1),
            offset.max(0),
        )
        .await?)
    }

    async fn append_log(&self, entry: NewExecutionLog) -> Result<()> {
        ExecutionLog::append(&self.pool, entry).await?;
        Ok(())
    }
}
