//! Task Distributors
//!
//! A [`TaskDistributor`] hands one outbox row to the external task queue.
//! Delivery is at-least-once: a row whose distribution succeeded but whose
//! `published` mark was lost is distributed again on the next batch, so
//! consumers dedupe on `outbox_id`.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::Connection;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::OutboxMessage;

#[derive(Error, Debug)]
pub enum DistributeError {
    #[error("Task queue unavailable: {0}")]
    Unavailable(String),

    #[error("Task encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DistributeError {
    pub fn code(&self) -> &'static str {
        match self {
            DistributeError::Unavailable(_) => "QUEUE_UNAVAILABLE",
            DistributeError::Encode(_) => "TASK_ENCODE_FAILED",
        }
    }
}

impl From<redis::RedisError> for DistributeError {
    fn from(e: redis::RedisError) -> Self {
        DistributeError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait TaskDistributor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Enqueue `msg`; returns the queue's id for the task
    async fn distribute(&self, msg: &OutboxMessage) -> Result<String, DistributeError>;
}

/// Appends tasks to one Redis stream per queue (`<prefix>:<queue>`)
pub struct RedisTaskDistributor {
    connection: Arc<Mutex<Connection>>,
    stream_prefix: String,
}

impl RedisTaskDistributor {
    pub async fn connect(redis_url: &str, stream_prefix: &str) -> Result<Self, DistributeError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_async_connection().await?;

        info!(stream_prefix, "Redis task distributor connected");

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            stream_prefix: stream_prefix.to_string(),
        })
    }

    pub fn stream_key(&self, queue: &str) -> String {
        format!("{}:{}", self.stream_prefix, queue)
    }
}

#[async_trait]
impl TaskDistributor for RedisTaskDistributor {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn distribute(&self, msg: &OutboxMessage) -> Result<String, DistributeError> {
        let payload = serde_json::to_string(&msg.payload)?;
        let due_at = process_at(Utc::now().timestamp(), msg.delay_secs).to_string();
        let outbox_id = msg.id.to_string();
        let max_retry = msg.max_retry.to_string();
        let stream = self.stream_key(&msg.queue);

        let mut conn = self.connection.lock().await;
        let entry_id: String = conn
            .xadd(
                &stream,
                "*",
                &[
                    ("type", msg.task_type.as_str()),
                    ("payload", payload.as_str()),
                    ("outbox_id", outbox_id.as_str()),
                    ("max_retry", max_retry.as_str()),
                    ("process_at", due_at.as_str()),
                ],
            )
            .await?;

        debug!(stream = %stream, entry_id = %entry_id, outbox_id = msg.id, "Task appended");
        Ok(entry_id)
    }
}

/// Unix time at which a task delayed by `delay_secs` becomes due
fn process_at(now: i64, delay_secs: i64) -> i64 {
    now.saturating_add(delay_secs.max(0))
}

/// In-process distributor that records every task it accepts.
///
/// `fail_next(n)` makes the next `n` calls fail with `Unavailable`.
#[derive(Default)]
pub struct MemoryDistributor {
    delivered: std::sync::Mutex<Vec<OutboxMessage>>,
    fail_remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl MemoryDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<OutboxMessage> {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskDistributor for MemoryDistributor {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn distribute(&self, msg: &OutboxMessage) -> Result<String, DistributeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(DistributeError::Unavailable("injected failure".into()));
        }

        let mut delivered = self
            .delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        delivered.push(msg.clone());
        Ok(format!("mem-{}", delivered.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutboxStatus;

    fn message() -> OutboxMessage {
        OutboxMessage {
            id: 7,
            task_type: "task:send_verify_email".into(),
            payload: serde_json::json!({ "email": "alice@example.com" }),
            queue: "critical".into(),
            max_retry: 10,
            delay_secs: 10,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            published_at: None,
        }
    }

    #[tokio::test]
    async fn test_memory_distributor_records() {
        let distributor = MemoryDistributor::new();
        let id = distributor.distribute(&message()).await.unwrap();
        assert_eq!(id, "mem-1");
        assert_eq!(distributor.delivered()[0].id, 7);
    }

    #[tokio::test]
    async fn test_memory_distributor_injected_failures() {
        let distributor = MemoryDistributor::new();
        distributor.fail_next(2);

        assert!(distributor.distribute(&message()).await.is_err());
        assert!(distributor.distribute(&message()).await.is_err());
        assert!(distributor.distribute(&message()).await.is_ok());
        assert_eq!(distributor.call_count(), 3);
        assert_eq!(distributor.delivered().len(), 1);
    }

    #[test]
    fn test_process_at_saturates() {
        assert_eq!(process_at(1_700_000_000, 10), 1_700_000_010);
        assert_eq!(process_at(1_700_000_000, i64::MAX), i64::MAX);
        assert_eq!(process_at(1_700_000_000, -5), 1_700_000_000);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            DistributeError::Unavailable("down".into()).code(),
            "QUEUE_UNAVAILABLE"
        );
    }

    #[tokio::test]
    #[ignore = "Requires Redis at redis://127.0.0.1:6379"]
    async fn test_redis_distribute() {
        let distributor = RedisTaskDistributor::connect("redis://127.0.0.1:6379", "test_tasks")
            .await
            .unwrap();
        assert_eq!(distributor.stream_key("critical"), "test_tasks:critical");
        let entry_id = distributor.distribute(&message()).await.unwrap();
        assert!(entry_id.contains('-'));
    }
}
