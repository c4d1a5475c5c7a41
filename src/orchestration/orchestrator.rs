//! # Orchestrator
//!
//! Drives one execution end-to-end: loads the definition, iterates steps
//! from the checkpoint cursor, invokes handlers with bounded timeouts,
//! applies the two-level retry policy, and settles the execution. All
//! state changes go through the guarded updates in the models, so a
//! concurrent transition (another worker, a cancel) is always observed as
//! a zero-row update rather than a lost write.

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::handlers::HandlerError;
use crate::messaging::{EnqueueReason, ExecutionMessage, QueueClient};
use crate::models::{
    is_dense_ordering, Execution, ExecutionLog, NewExecutionLog, NewStepExecution, StepExecution,
    WorkflowStep,
};
use crate::registry::TaskHandlerRegistry;
use crate::state_machine::ExecutionStatus;

use super::backoff::BackoffPolicy;

/// How a call to [`Orchestrator::run`] settled the execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All steps succeeded
    Completed,
    /// Failed with no retry budget remaining (or a non-retryable fault)
    Failed,
    /// Failed and re-enqueued with a backoff delay
    Retrying,
    /// Cancellation observed; execution settled cancelled
    Cancelled,
    /// The execution was not in an admissible state (a duplicate delivery
    /// or a concurrent worker); nothing was done.
    NoOp,
}

pub struct Orchestrator {
    pool: PgPool,
    queue: QueueClient,
    registry: Arc<TaskHandlerRegistry>,
    step_backoff: BackoffPolicy,
    exec_backoff: BackoffPolicy,
}

impl Orchestrator {
    pub fn new(
        pool: PgPool,
        queue: QueueClient,
        registry: Arc<TaskHandlerRegistry>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            pool,
            queue,
            registry,
            step_backoff: config.step_backoff(),
            exec_backoff: config.exec_backoff(),
        }
    }

    /// Drive one execution to a settled state.
    ///
    /// Preconditions: the row exists and is `pending` or `retrying`; any
    /// other state is a duplicate delivery and no-ops. Postcondition: the
    /// row is `completed`, `failed`, `retrying`, or `cancelled`.
    pub async fn run(&self, execution_id: Uuid) -> Result<RunOutcome> {
        let execution = Execution::find_by_id(&self.pool, execution_id)
            .await?
            .ok_or_else(|| EngineError::not_found("execution", execution_id))?;

        let status = execution.parsed_status()?;
        if !status.is_admissible() {
            debug!(%execution_id, %status, "execution not admissible, skipping delivery");
            return Ok(RunOutcome::NoOp);
        }

        let Some(execution) = Execution::mark_running(&self.pool, execution_id).await? else {
            // Concurrent transition won between the read and the guard
            return self.observe_race(execution_id).await;
        };

        info!(
            %execution_id,
            workflow_id = %execution.workflow_id,
            from_step = execution.current_step_order,
            retry_count = execution.retry_count,
            "execution running"
        );
        self.log(
            NewExecutionLog::info(execution_id, "execution started").with_details(json!({
                "from_step": execution.current_step_order,
                "retry_count": execution.retry_count,
            })),
        )
        .await?;

        let steps = WorkflowStep::list_by_workflow(&self.pool, execution.workflow_id).await?;
        if !is_dense_ordering(&steps) {
            let reason = "step orders do not form a dense prefix from 0";
            error!(%execution_id, workflow_id = %execution.workflow_id, reason, "definition corrupt");
            return self
                .settle_failed(
                    execution_id,
                    &format!("workflow definition is corrupt: {reason}"),
                    false,
                )
                .await;
        }

        // Carry-over data: the latest completed step's output is the
        // authoritative input for the next step on resume.
        let mut data = if execution.current_step_order > 0 {
            StepExecution::latest_completed_output(&self.pool, execution_id)
                .await?
                .unwrap_or_else(|| execution.input_data.clone())
        } else {
            execution.input_data.clone()
        };

        let start = usize::try_from(execution.current_step_order.max(0)).unwrap_or(0);
        for step in steps.iter().skip(start) {
            // Cancellation is observed at step boundaries
            if let Some(outcome) = self.check_cancelled(execution_id, None).await? {
                return Ok(outcome);
            }

            let Some(handler) = self.registry.get(&step.task_type) else {
                let message = format!(
                    "no handler registered for task type '{}' (step '{}')",
                    step.task_type, step.name
                );
                error!(%execution_id, step_order = step.step_order, task_type = %step.task_type, "handler missing");
                self.log(
                    NewExecutionLog::error(execution_id, message.clone())
                        .with_details(json!({"step_order": step.step_order})),
                )
                .await?;
                // Missing handlers are permanent: retrying cannot help
                return self.settle_failed(execution_id, &message, false).await;
            };

            match self.run_step(&execution, step, &data, handler).await? {
                StepOutcome::Completed(output) => {
                    data = output;
                }
                StepOutcome::Cancelled => return Ok(RunOutcome::Cancelled),
                StepOutcome::Raced(outcome) => return Ok(outcome),
                StepOutcome::Exhausted(message) => {
                    return self.settle_failed(execution_id, &message, true).await;
                }
                StepOutcome::Fatal(message) => {
                    return self.settle_failed(execution_id, &message, true).await;
                }
            }
        }

        match Execution::mark_completed(&self.pool, execution_id, &data).await? {
            Some(_) => {
                info!(%execution_id, "execution completed");
                self.log(NewExecutionLog::info(execution_id, "execution completed"))
                    .await?;
                Ok(RunOutcome::Completed)
            }
            None => self.observe_race(execution_id).await,
        }
    }

    /// Run one step to success or exhaustion, creating a new attempt row
    /// per try and sleeping the step backoff between tries.
    async fn run_step(
        &self,
        execution: &Execution,
        step: &WorkflowStep,
        data: &serde_json::Value,
        handler: Arc<dyn crate::handlers::TaskHandler>,
    ) -> Result<StepOutcome> {
        let execution_id = execution.execution_id;
        let timeout = Duration::from_secs(u64::try_from(step.timeout_seconds).unwrap_or(300));

        loop {
            let prior = StepExecution::count_attempts(&self.pool, execution_id, step.step_order)
                .await?;
            let attempt_number = i32::try_from(prior).unwrap_or(i32::MAX - 1) + 1;

            let attempt = StepExecution::create(
                &self.pool,
                NewStepExecution {
                    execution_id,
                    step_id: step.step_id,
                    step_order: step.step_order,
                    attempt_number,
                    input_data: data.clone(),
                },
            )
            .await?;

            if StepExecution::mark_running(&self.pool, attempt.step_execution_id)
                .await?
                .is_none()
            {
                // Attempt row settled underneath us; treat as a lost race
                return self.observe_race(execution_id).await.map(StepOutcome::Raced);
            }

            info!(
                %execution_id,
                step_order = step.step_order,
                step_name = %step.name,
                attempt = attempt_number,
                "step attempt started"
            );
            self.log(
                NewExecutionLog::info(
                    execution_id,
                    format!(
                        "starting step '{}' (attempt {attempt_number} of {})",
                        step.name,
                        step.max_retries + 1
                    ),
                )
                .for_step(attempt.step_execution_id),
            )
            .await?;

            let outcome =
                match tokio::time::timeout(timeout, handler.execute(&step.config, data, timeout))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::retryable_with(
                        format!(
                            "step '{}' timed out after {}s",
                            step.name, step.timeout_seconds
                        ),
                        json!({"timeout_seconds": step.timeout_seconds}),
                    )),
                };

            // An in-flight handler is allowed to finish, but a cancel that
            // landed meanwhile discards its outcome.
            if let Some(outcome) = self
                .check_cancelled(execution_id, Some(attempt.step_execution_id))
                .await?
            {
                return Ok(match outcome {
                    RunOutcome::Cancelled => StepOutcome::Cancelled,
                    other => StepOutcome::Raced(other),
                });
            }

            match outcome {
                Ok(output) => {
                    let advanced = StepExecution::complete_and_advance(
                        &self.pool,
                        attempt.step_execution_id,
                        execution_id,
                        step.step_order + 1,
                        &output,
                    )
                    .await?;

                    if !advanced {
                        // The execution left running between the post-handler
                        // check and the checkpoint; the outcome is discarded
                        StepExecution::mark_skipped(
                            &self.pool,
                            attempt.step_execution_id,
                            "execution settled concurrently; attempt outcome discarded",
                        )
                        .await?;
                        return self.observe_race(execution_id).await.map(StepOutcome::Raced);
                    }

                    info!(%execution_id, step_order = step.step_order, "step completed");
                    self.log(
                        NewExecutionLog::info(
                            execution_id,
                            format!("step '{}' completed", step.name),
                        )
                        .for_step(attempt.step_execution_id),
                    )
                    .await?;
                    return Ok(StepOutcome::Completed(output));
                }
                Err(handler_err) => {
                    let details = json!({
                        "attempt": attempt_number,
                        "retryable": handler_err.is_retryable(),
                        "handler_details": handler_err.details().cloned().unwrap_or(json!(null)),
                    });
                    StepExecution::mark_failed(
                        &self.pool,
                        attempt.step_execution_id,
                        &handler_err.to_string(),
                        Some(&details),
                    )
                    .await?;

                    let may_retry =
                        handler_err.is_retryable() && attempt_number <= step.max_retries;

                    if may_retry {
                        let delay = self.step_backoff.delay(attempt_number as u32);
                        warn!(
                            %execution_id,
                            step_order = step.step_order,
                            attempt = attempt_number,
                            delay_ms = delay.as_millis() as u64,
                            error = %handler_err,
                            "step attempt failed, retrying"
                        );
                        self.log(
                            NewExecutionLog::warning(
                                execution_id,
                                format!(
                                    "step '{}' attempt {attempt_number} failed: {handler_err}",
                                    step.name
                                ),
                            )
                            .for_step(attempt.step_execution_id)
                            .with_details(details),
                        )
                        .await?;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    self.log(
                        NewExecutionLog::error(
                            execution_id,
                            format!(
                                "step '{}' failed on attempt {attempt_number}: {handler_err}",
                                step.name
                            ),
                        )
                        .for_step(attempt.step_execution_id)
                        .with_details(details),
                    )
                    .await?;

                    let message = if handler_err.is_retryable() {
                        format!(
                            "step '{}' failed after {attempt_number} attempt(s): {handler_err}",
                            step.name
                        )
                    } else {
                        format!("step '{}' failed permanently: {handler_err}", step.name)
                    };
                    return Ok(if handler_err.is_retryable() {
                        StepOutcome::Exhausted(message)
                    } else {
                        StepOutcome::Fatal(message)
                    });
                }
            }
        }
    }

    /// Settle an execution-level failure: `running -> failed`, then spend a
    /// unit of retry budget when available and permitted.
    async fn settle_failed(
        &self,
        execution_id: Uuid,
        error_message: &str,
        allow_retry: bool,
    ) -> Result<RunOutcome> {
        let Some(failed) = Execution::mark_failed(&self.pool, execution_id, error_message).await?
        else {
            return self.observe_race(execution_id).await;
        };

        if allow_retry && failed.retry_count < failed.max_retries {
            let next_attempt = u32::try_from(failed.retry_count + 1).unwrap_or(u32::MAX);
            let delay = self.exec_backoff.delay(next_attempt);
            let scheduled_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

            match Execution::mark_retrying(&self.pool, execution_id, scheduled_at).await? {
                Some(retrying) => {
                    info!(
                        %execution_id,
                        retry_count = retrying.retry_count,
                        max_retries = retrying.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "execution scheduled for retry"
                    );
                    self.log(
                        NewExecutionLog::warning(
                            execution_id,
                            format!(
                                "execution failed, retry {} of {} scheduled: {error_message}",
                                retrying.retry_count, retrying.max_retries
                            ),
                        )
                        .with_details(json!({"delay_seconds": delay.as_secs_f64()})),
                    )
                    .await?;

                    let message = ExecutionMessage::new(execution_id, EnqueueReason::Retry);
                    if let Err(e) = self.queue.send(&message, Some(delay.as_secs_f64())).await {
                        // The row already says retrying; the sweeper will
                        // re-dispatch it once the schedule lapses.
                        warn!(%execution_id, error = %e, "retry enqueue failed, deferring to sweeper");
                    }
                    Ok(RunOutcome::Retrying)
                }
                None => self.observe_race(execution_id).await,
            }
        } else {
            error!(%execution_id, error = %error_message, "execution failed permanently");
            self.log(NewExecutionLog::error(
                execution_id,
                format!("execution failed: {error_message}"),
            ))
            .await?;
            Ok(RunOutcome::Failed)
        }
    }

    /// Re-read after a cancel check. When the execution is cancelled, the
    /// optional in-flight attempt settles `skipped` (its outcome is
    /// discarded) and the observation is logged.
    async fn check_cancelled(
        &self,
        execution_id: Uuid,
        attempt_id: Option<Uuid>,
    ) -> Result<Option<RunOutcome>> {
        let execution = Execution::find_by_id(&self.pool, execution_id)
            .await?
            .ok_or_else(|| EngineError::not_found("execution", execution_id))?;

        match execution.parsed_status()? {
            ExecutionStatus::Cancelled => {
                if let Some(attempt_id) = attempt_id {
                    StepExecution::mark_skipped(
                        &self.pool,
                        attempt_id,
                        "cancellation observed; attempt outcome discarded",
                    )
                    .await?;
                }
                info!(%execution_id, "cancellation observed, stopping");
                self.log(NewExecutionLog::info(
                    execution_id,
                    "cancellation observed by worker",
                ))
                .await?;
                Ok(Some(RunOutcome::Cancelled))
            }
            ExecutionStatus::Running => Ok(None),
            status => {
                // Some other worker or operator settled it meanwhile
                debug!(%execution_id, %status, "execution left running state mid-drive");
                Ok(Some(RunOutcome::NoOp))
            }
        }
    }

    /// A guarded update matched zero rows: somebody else moved the
    /// execution. Read what happened and report it as an outcome.
    async fn observe_race(&self, execution_id: Uuid) -> Result<RunOutcome> {
        let execution = Execution::find_by_id(&self.pool, execution_id)
            .await?
            .ok_or_else(|| EngineError::not_found("execution", execution_id))?;

        match execution.parsed_status()? {
            ExecutionStatus::Cancelled => Ok(RunOutcome::Cancelled),
            _ => Ok(RunOutcome::NoOp),
        }
    }

    async fn log(&self, entry: NewExecutionLog) -> Result<()> {
        ExecutionLog::append(&self.pool, entry).await?;
        Ok(())
    }
}

/// Outcome of driving a single step
enum StepOutcome {
    /// Step succeeded with this output
    Completed(serde_json::Value),
    /// Cancellation observed during the step
    Cancelled,
    /// A concurrent transition took the execution away
    Raced(RunOutcome),
    /// Retryable failures exhausted the per-step budget
    Exhausted(String),
    /// Permanent handler failure
    Fatal(String),
}
