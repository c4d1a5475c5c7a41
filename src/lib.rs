//! # flowline
//!
//! Durable workflow orchestration engine on PostgreSQL. Workflows are
//! versioned, ordered sequences of typed steps; executions are durable,
//! idempotently-admitted attempts to run them. The engine checkpoints
//! progress after every step, retries with truncated exponential backoff
//! at both the step and execution level, recovers from worker crashes via
//! a queue visibility lease plus a periodic sweeper, and records an
//! ordered audit log per execution.

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod services;
pub mod state_machine;
pub mod worker;

pub use config::EngineConfig;
pub use error::{EngineError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_concurrency, 4);
        assert_eq!(config.queue_visibility_s, 600);
        assert!(config.validate().is_ok());
    }
}
