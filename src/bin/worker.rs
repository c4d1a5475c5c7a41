//! Worker process entrypoint: connect, migrate, and run the worker loops
//! plus the sweeper until SIGINT/SIGTERM.
//!
//! Exit codes: 0 clean shutdown, 1 configuration error, 2 unrecoverable
//! store error, 3 unrecoverable queue error.

use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use flowline::config::{EngineConfig, EXECUTION_QUEUE};
use flowline::database;
use flowline::handlers::default_registry;
use flowline::logging::init_logging;
use flowline::messaging::QueueClient;
use flowline::orchestration::Orchestrator;
use flowline::worker::{Sweeper, Worker};

const EXIT_CONFIG: u8 = 1;
const EXIT_STORE: u8 = 2;
const EXIT_QUEUE: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_logging(&config.log_level);

    let pool = match database::connect(&config.db_url, config.db_pool_size).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "could not connect to the durable store");
            return ExitCode::from(EXIT_STORE);
        }
    };

    if let Err(e) = database::migrate(&pool).await {
        error!(error = %e, "database migration failed");
        return ExitCode::from(EXIT_STORE);
    }

    let queue_pool = if config.queue_url() == config.db_url {
        pool.clone()
    } else {
        match database::connect(config.queue_url(), config.db_pool_size).await {
            Ok(pool) => pool,
            Err(e) => {
                error!(error = %e, "could not connect to the queue");
                return ExitCode::from(EXIT_QUEUE);
            }
        }
    };
    let queue = QueueClient::new(queue_pool, EXECUTION_QUEUE);
    if !queue.health_check().await {
        error!("queue is unreachable");
        return ExitCode::from(EXIT_QUEUE);
    }

    let registry = Arc::new(default_registry());
    info!(task_types = ?registry.task_types(), "handler registry populated");

    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        queue.clone(),
        registry,
        &config,
    ));
    let worker = Worker::new(pool.clone(), queue.clone(), orchestrator, &config);
    let sweeper = Sweeper::new(pool, queue, &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let sweeper_shutdown = shutdown_rx.clone();
    let sweeper_task = tokio::spawn(async move { sweeper.run(sweeper_shutdown).await });

    worker.run(shutdown_rx).await;
    let _ = sweeper_task.await;

    info!("clean shutdown");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "could not install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
