//! # Postgres Delivery Queue Client
//!
//! SQS-like message queue operations directly on PostgreSQL. Messages are
//! rows in `flowline_queue_messages`; a message is deliverable when its
//! `vt` (visibility timeout) has passed. Reading a message pushes `vt`
//! forward, which is the lease; the `msg_id` doubles as the lease token.
//! Deleting the row acknowledges processing; an unacknowledged lease simply
//! expires and the message is delivered again.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;

use super::errors::QueueResult;
use super::message::ExecutionMessage;

/// Message read from the queue with delivery metadata
#[derive(Debug, Clone, FromRow)]
pub struct QueueMessage {
    /// Message ID; also the lease token for ack/extend
    pub msg_id: i64,
    /// Message content as JSON
    pub message: serde_json::Value,
    /// When the current lease expires and the message becomes visible again
    pub vt: DateTime<Utc>,
    /// How many times this message has been delivered
    pub read_ct: i32,
    /// When the message was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl QueueMessage {
    /// Parse the payload as an execution dispatch message
    pub fn parse(&self, queue_name: &str) -> QueueResult<ExecutionMessage> {
        ExecutionMessage::from_json(self.message.clone()).map_err(|e| {
            super::errors::QueueError::invalid_message(queue_name, self.msg_id, e.to_string())
        })
    }
}

/// Queue depth statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub queue_name: String,
    pub queue_length: i64,
    pub visible_messages: i64,
}

/// Postgres message queue client
#[derive(Debug, Clone)]
pub struct QueueClient {
    pool: PgPool,
    queue_name: String,
}

impl QueueClient {
    pub fn new(pool: PgPool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Send a message, optionally deferred by `delay_seconds`
    pub async fn send(
        &self,
        message: &ExecutionMessage,
        delay_seconds: Option<f64>,
    ) -> QueueResult<i64> {
        let delay = delay_seconds.unwrap_or(0.0).max(0.0);
        let payload = message.to_json()?;

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO flowline_queue_messages (queue_name, message, vt)
            VALUES ($1, $2, now() + make_interval(secs => $3))
            RETURNING msg_id
            "#,
        )
        .bind(&self.queue_name)
        .bind(&payload)
        .bind(delay)
        .fetch_one(&self.pool)
        .await?;

        debug!(
            queue = %self.queue_name,
            msg_id = row.0,
            execution_id = %message.execution_id,
            delay_seconds = delay,
            "message enqueued"
        );
        Ok(row.0)
    }

    /// Send a message that becomes visible at a specific instant
    pub async fn send_at(
        &self,
        message: &ExecutionMessage,
        deliver_at: DateTime<Utc>,
    ) -> QueueResult<i64> {
        let payload = message.to_json()?;

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO flowline_queue_messages (queue_name, message, vt)
            VALUES ($1, $2, GREATEST($3, now()))
            RETURNING msg_id
            "#,
        )
        .bind(&self.queue_name)
        .bind(&payload)
        .bind(deliver_at)
        .fetch_one(&self.pool)
        .await?;

        debug!(
            queue = %self.queue_name,
            msg_id = row.0,
            deliver_at = %deliver_at,
            "message enqueued for deferred delivery"
        );
        Ok(row.0)
    }

    /// Read the next visible message and lease it for `vt_seconds`.
    ///
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent readers from blocking on
    /// each other; each delivery bumps `read_ct`.
    pub async fn read(&self, vt_seconds: i32) -> QueueResult<Option<QueueMessage>> {
        let message = sqlx::query_as::<_, QueueMessage>(
            r#"
            WITH next AS (
                SELECT msg_id
                FROM flowline_queue_messages
                WHERE queue_name = $1 AND vt <= now()
                ORDER BY msg_id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE flowline_queue_messages m
            SET vt = now() + make_interval(secs => $2),
                read_ct = m.read_ct + 1
            FROM next
            WHERE m.msg_id = next.msg_id
            RETURNING m.msg_id, m.message, m.vt, m.read_ct, m.enqueued_at
            "#,
        )
        .bind(&self.queue_name)
        .bind(f64::from(vt_seconds))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref msg) = message {
            debug!(
                queue = %self.queue_name,
                msg_id = msg.msg_id,
                read_ct = msg.read_ct,
                "message leased"
            );
        }
        Ok(message)
    }

    /// Acknowledge a message (delete it). Returns false if the message was
    /// already gone.
    pub async fn delete(&self, msg_id: i64) -> QueueResult<bool> {
        let deleted = sqlx::query(
            "DELETE FROM flowline_queue_messages WHERE queue_name = $1 AND msg_id = $2",
        )
        .bind(&self.queue_name)
        .bind(msg_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        debug!(queue = %self.queue_name, msg_id, acked = deleted > 0, "message acknowledged");
        Ok(deleted > 0)
    }

    /// Extend a lease by pushing the visibility timeout further out
    pub async fn set_vt(&self, msg_id: i64, extra_seconds: i32) -> QueueResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE flowline_queue_messages
            SET vt = now() + make_interval(secs => $3)
            WHERE queue_name = $1 AND msg_id = $2
            "#,
        )
        .bind(&self.queue_name)
        .bind(msg_id)
        .bind(f64::from(extra_seconds))
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }

    /// Drop all messages in this queue
    pub async fn purge(&self) -> QueueResult<u64> {
        let purged = sqlx::query("DELETE FROM flowline_queue_messages WHERE queue_name = $1")
            .bind(&self.queue_name)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(purged)
    }

    /// Queue depth, total and currently deliverable
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let row: (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE vt <= now())
            FROM flowline_queue_messages
            WHERE queue_name = $1
            "#,
        )
        .bind(&self.queue_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            queue_length: row.0,
            visible_messages: row.1,
        })
    }

    /// Check if the queue's backing store is reachable
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
