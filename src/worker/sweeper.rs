//! # Stuck-Execution Sweeper
//!
//! Periodic recovery without distributed locks. Three sweeps per tick:
//!
//! 1. `running` rows with stale `updated_at` lost their worker (crash,
//!    expired lease): guarded update back to `retrying`, then re-enqueue.
//! 2. `pending` rows that are due but never got delivered (enqueue failed
//!    after the admission commit): re-enqueue.
//! 3. `retrying` rows whose schedule lapsed without delivery (retry
//!    enqueue failed): re-enqueue.
//!
//! Re-dispatch is at-least-once; a duplicate delivery no-ops against the
//! execution state machine.

use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::messaging::{EnqueueReason, ExecutionMessage, QueueClient};
use crate::models::{Execution, ExecutionLog, NewExecutionLog};

pub struct Sweeper {
    pool: PgPool,
    queue: QueueClient,
    interval: Duration,
    stuck_threshold: Duration,
}

impl Sweeper {
    pub fn new(pool: PgPool, queue: QueueClient, config: &EngineConfig) -> Self {
        Self {
            pool,
            queue,
            interval: Duration::from_secs(config.sweeper_interval_s),
            stuck_threshold: Duration::from_secs(config.sweeper_stuck_threshold_s),
        }
    }

    /// Run the sweep loop until the shutdown signal flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_s = self.interval.as_secs(),
            stuck_threshold_s = self.stuck_threshold.as_secs(),
            "sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "sweep pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("sweeper stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One full sweep pass. Public so tests can drive it directly.
    pub async fn sweep_once(&self) -> Result<usize> {
        let threshold = self.stuck_threshold.as_secs_f64();
        let mut recovered = 0;

        let stuck = Execution::sweep_stuck(&self.pool, threshold).await?;
        for execution in &stuck {
            warn!(
                execution_id = %execution.execution_id,
                "recovered stuck execution, re-dispatching"
            );
            ExecutionLog::append(
                &self.pool,
                NewExecutionLog::warning(
                    execution.execution_id,
                    "execution recovered by sweeper after stale lease",
                ),
            )
            .await?;
            self.redispatch(execution.execution_id).await;
            recovered += 1;
        }

        for execution in Execution::list_stale_pending(&self.pool, threshold).await? {
            debug!(
                execution_id = %execution.execution_id,
                "re-dispatching undelivered pending execution"
            );
            self.redispatch(execution.execution_id).await;
            recovered += 1;
        }

        for execution in Execution::list_stale_retrying(&self.pool, threshold).await? {
            debug!(
                execution_id = %execution.execution_id,
                "re-dispatching lapsed retrying execution"
            );
            self.redispatch(execution.execution_id).await;
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "sweep pass recovered executions");
        }
        Ok(recovered)
    }

    async fn redispatch(&self, execution_id: uuid::Uuid) {
        let message = ExecutionMessage::new(execution_id, EnqueueReason::Sweeper);
        if let Err(e) = self.queue.send(&message, None).await {
            // Next sweep tick tries again
            warn!(%execution_id, error = %e, "sweeper re-enqueue failed");
        }
    }
}
