//! Queue broker abstraction
//!
//! Named FIFO queues with at-least-once delivery, result records, pub/sub
//! channels, and queryable service heartbeats. Production runs on Redis
//! ([`RedisBroker`], sorted set per queue); tests and single-process
//! development use [`MemoryBroker`] with identical semantics.
//!
//! Ordering is strict FIFO per queue name; a task's priority breaks ties
//! only against tasks of the same queue. Cross-queue ordering is never
//! guaranteed.

mod memory;
mod redis;

pub use memory::MemoryBroker;
pub use redis::RedisBroker;

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::messages::{Heartbeat, QueueName, QueueTask, TaskId, TaskPayload};

/// Result records are readable for an hour after the worker publishes them.
pub const RESULT_TTL: Duration = Duration::from_secs(3600);

/// A heartbeat record older than this is treated as absent.
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(120);

/// Retention horizon stamped on `job_application` tasks; they carry plaintext
/// credentials, so consumers drop them once this has passed.
pub const JOB_APPLICATION_RETENTION: Duration = Duration::from_secs(3600);

/// Priority is clamped to this magnitude so the sorted-set score keeps full
/// integer precision in an f64.
pub const MAX_PRIORITY: i32 = 1000;

const PRIORITY_STRIDE: f64 = (1u64 << 40) as f64;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unknown queue name: {0}")]
    UnknownQueue(String),
}

impl From<::redis::RedisError> for BrokerError {
    fn from(err: ::redis::RedisError) -> Self {
        BrokerError::Unavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Queue broker primitives shared by dispatcher and workers
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a payload to the tail of its queue. Returns the task id.
    async fn publish(&self, payload: &TaskPayload, priority: i32) -> Result<TaskId>;

    /// Re-enqueue an existing task verbatim (same id, caller-adjusted retry
    /// count). Used by workers backing off after a transient failure.
    async fn republish(&self, task: &QueueTask) -> Result<()>;

    /// Destructive blocking pop from the head of a queue, waiting up to
    /// `timeout` (zero means non-blocking). Not transactional: a crash after
    /// the pop loses the task unless the consumer republishes.
    async fn consume(&self, queue: QueueName, timeout: Duration) -> Result<Option<QueueTask>>;

    /// Store a result record keyed by task id, readable for [`RESULT_TTL`].
    async fn publish_result(&self, task_id: &str, payload: serde_json::Value) -> Result<()>;

    /// Read a result record if it exists and has not expired.
    async fn result(&self, task_id: &str) -> Result<Option<serde_json::Value>>;

    /// Fire-and-forget pub/sub.
    async fn publish_channel(&self, channel: &str, payload: serde_json::Value) -> Result<()>;

    /// Publish a heartbeat: pub/sub on `heartbeat:<service>` plus a keyed
    /// record with [`HEARTBEAT_TTL`] so liveness is queryable.
    async fn heartbeat(&self, service: &str, beat: &Heartbeat) -> Result<()>;

    /// Latest unexpired heartbeat for a service.
    async fn last_heartbeat(&self, service: &str) -> Result<Option<Heartbeat>>;

    /// Number of tasks waiting in a queue.
    async fn queue_depth(&self, queue: QueueName) -> Result<usize>;

    /// Cheap connectivity probe for health reporting.
    async fn ping(&self) -> bool;
}

/// Build a fresh envelope around a payload at publish time
pub(crate) fn new_task(payload: &TaskPayload, priority: i32) -> QueueTask {
    let now = Utc::now();
    let expires_at = match payload.queue() {
        QueueName::JobApplication => {
            Some(now + chrono::Duration::from_std(JOB_APPLICATION_RETENTION).unwrap_or_default())
        }
        _ => None,
    };
    QueueTask {
        id: Uuid::now_v7().to_string(),
        retries: 0,
        priority: priority.clamp(-MAX_PRIORITY, MAX_PRIORITY),
        created_at: now,
        expires_at,
        payload: payload.clone(),
    }
}

/// Sorted-set score: lower scores dequeue first, so higher priority maps to a
/// more negative component and the sequence number preserves FIFO within one
/// priority level.
pub(crate) fn priority_score(priority: i32, seq: u64) -> f64 {
    let p = priority.clamp(-MAX_PRIORITY, MAX_PRIORITY) as f64;
    -p * PRIORITY_STRIDE + seq as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{SendNotification, TaskPayload};

    #[test]
    fn test_score_orders_fifo_within_priority() {
        assert!(priority_score(0, 1) < priority_score(0, 2));
        assert!(priority_score(5, 100) < priority_score(5, 101));
    }

    #[test]
    fn test_score_orders_priority_first() {
        // Higher priority dequeues before an older lower-priority task
        assert!(priority_score(1, 999_999) < priority_score(0, 1));
        assert!(priority_score(0, 999_999) < priority_score(-1, 1));
    }

    #[test]
    fn test_score_clamps_extreme_priorities() {
        assert_eq!(
            priority_score(i32::MAX, 7),
            priority_score(MAX_PRIORITY, 7)
        );
        assert_eq!(
            priority_score(i32::MIN, 7),
            priority_score(-MAX_PRIORITY, 7)
        );
    }

    #[test]
    fn test_new_task_stamps_retention_only_for_job_application() {
        let notify = TaskPayload::SendNotification(SendNotification {
            profile_id: 1,
            to: "+1555".to_string(),
            body: "hi".to_string(),
        });
        assert!(new_task(&notify, 0).expires_at.is_none());
    }
}
