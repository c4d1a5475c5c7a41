//! Delivery queue between admission and workers.
//!
//! At-least-once delivery with deferred visibility and per-message leases,
//! backed by the same PostgreSQL cluster as the durable store. Exactly-once
//! is not attempted here: the execution state machine's guarded updates
//! make duplicate deliveries no-op.

pub mod errors;
pub mod message;
pub mod queue_client;

pub use errors::{QueueError, QueueResult};
pub use message::{EnqueueReason, ExecutionMessage};
pub use queue_client::{QueueClient, QueueMessage, QueueStats};
