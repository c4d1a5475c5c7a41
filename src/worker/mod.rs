//! # Worker Loop
//!
//! Cooperative worker tasks over the delivery queue. Each task repeatedly
//! leases a message, asks the orchestrator to drive the execution, and
//! acknowledges on clean return. Infrastructure faults leave the message
//! unacknowledged so the lease expires and delivery repeats; the sweeper
//! covers workers that die outright.

pub mod sweeper;

pub use sweeper::Sweeper;

use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::database;
use crate::messaging::{QueueClient, QueueMessage};
use crate::orchestration::Orchestrator;

pub struct Worker {
    pool: PgPool,
    queue: QueueClient,
    orchestrator: Arc<Orchestrator>,
    concurrency: usize,
    visibility_s: i32,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        queue: QueueClient,
        orchestrator: Arc<Orchestrator>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            pool,
            queue,
            orchestrator,
            concurrency: config.worker_concurrency,
            visibility_s: i32::try_from(config.queue_visibility_s).unwrap_or(i32::MAX),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_s),
        }
    }

    /// Check that both the store and the queue are reachable
    pub async fn is_healthy(&self) -> bool {
        database::health_check(&self.pool).await && self.queue.health_check().await
    }

    /// Run worker tasks until the shutdown signal flips, then drain
    /// in-flight work up to the grace period.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(concurrency = self.concurrency, "worker starting");

        let mut tasks = JoinSet::new();
        for worker_index in 0..self.concurrency {
            let queue = self.queue.clone();
            let orchestrator = Arc::clone(&self.orchestrator);
            let shutdown = shutdown.clone();
            let visibility_s = self.visibility_s;
            let poll_interval = self.poll_interval;
            tasks.spawn(async move {
                worker_loop(
                    worker_index,
                    queue,
                    orchestrator,
                    visibility_s,
                    poll_interval,
                    shutdown,
                )
                .await;
            });
        }

        // Wait for every loop to notice the signal and drain, bounded by
        // the grace period.
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(
                grace_s = self.shutdown_grace.as_secs(),
                "shutdown grace period elapsed, aborting in-flight work"
            );
            tasks.abort_all();
        }

        info!("worker stopped");
    }
}

/// Single worker task: blocking poll, orchestrate, ack
async fn worker_loop(
    worker_index: usize,
    queue: QueueClient,
    orchestrator: Arc<Orchestrator>,
    visibility_s: i32,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_index, "worker loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let message = tokio::select! {
            result = queue.read(visibility_s) => result,
            _ = shutdown.changed() => continue,
        };

        match message {
            Ok(Some(message)) => {
                process_message(&queue, &orchestrator, message).await;
            }
            Ok(None) => {
                // Empty queue; idle until the next poll or shutdown
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                warn!(worker_index, error = %e, "queue read failed");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    debug!(worker_index, "worker loop stopped");
}

async fn process_message(
    queue: &QueueClient,
    orchestrator: &Orchestrator,
    message: QueueMessage,
) {
    let msg_id = message.msg_id;

    let execution_message = match message.parse(queue.queue_name()) {
        Ok(parsed) => parsed,
        Err(e) => {
            // Unparseable payloads would redeliver forever; drop them
            error!(msg_id, error = %e, "dropping malformed queue message");
            ack(queue, msg_id).await;
            return;
        }
    };

    let execution_id = execution_message.execution_id;
    debug!(msg_id, %execution_id, reason = ?execution_message.reason, "processing delivery");

    match orchestrator.run(execution_id).await {
        Ok(outcome) => {
            debug!(msg_id, %execution_id, ?outcome, "delivery processed");
            ack(queue, msg_id).await;
        }
        Err(e) if e.is_infrastructure() => {
            // No ack: the lease expires and the message is redelivered
            warn!(msg_id, %execution_id, error = %e, "infrastructure fault, leaving delivery leased");
        }
        Err(e) => {
            // Engine-level errors (e.g. the row is gone) will not improve
            // with redelivery
            error!(msg_id, %execution_id, error = %e, "orchestration error, dropping delivery");
            ack(queue, msg_id).await;
        }
    }
}

async fn ack(queue: &QueueClient, msg_id: i64) {
    if let Err(e) = queue.delete(msg_id).await {
        warn!(msg_id, error = %e, "acknowledge failed; duplicate delivery will no-op");
    }
}
