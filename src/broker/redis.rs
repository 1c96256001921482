//! Redis-backed broker
//!
//! One sorted set per queue name (`{ns}:q:{queue}`), scored so that ZPOPMIN
//! yields strict FIFO with priority as the tie-break. Result records and
//! heartbeats are plain keys with server-side TTLs; channels map onto Redis
//! pub/sub. All connections share one auto-reconnecting manager.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Broker, HEARTBEAT_TTL, RESULT_TTL, Result, new_task, priority_score};
use crate::messages::{Heartbeat, QueueName, QueueTask, TaskId, TaskPayload};

#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisBroker {
    /// Connect to Redis and start the reconnecting connection manager
    pub async fn connect(url: &str, namespace: &str) -> Result<Self> {
        info!(namespace, "Connecting to Redis broker");
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            namespace: namespace.to_string(),
        })
    }

    fn queue_key(&self, queue: QueueName) -> String {
        queue_key(&self.namespace, queue)
    }

    fn seq_key(&self) -> String {
        format!("{}:seq", self.namespace)
    }

    fn result_key(&self, task_id: &str) -> String {
        result_key(&self.namespace, task_id)
    }

    fn heartbeat_key(&self, service: &str) -> String {
        heartbeat_key(&self.namespace, service)
    }

    async fn enqueue(&self, task: &QueueTask) -> Result<()> {
        let mut conn = self.conn.clone();
        let seq: u64 = conn.incr(self.seq_key(), 1i64).await?;
        let score = priority_score(task.priority, seq);
        let member = serde_json::to_string(task)?;
        let _: () = conn.zadd(self.queue_key(task.queue()), member, score).await?;
        Ok(())
    }

    fn decode(&self, member: &str) -> Result<QueueTask> {
        // Reject members whose tag fell outside the queue enum before serde
        // reports a less specific error
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(member)
            && let Some(tag) = value.get("type").and_then(|t| t.as_str())
            && tag.parse::<QueueName>().is_err()
        {
            return Err(super::BrokerError::UnknownQueue(tag.to_string()));
        }
        Ok(serde_json::from_str(member)?)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, payload: &TaskPayload, priority: i32) -> Result<TaskId> {
        let task = new_task(payload, priority);
        self.enqueue(&task).await?;
        debug!(task_id = %task.id, queue = %task.queue(), priority, "Task published");
        Ok(task.id)
    }

    async fn republish(&self, task: &QueueTask) -> Result<()> {
        self.enqueue(task).await?;
        debug!(task_id = %task.id, retries = task.retries, "Task republished");
        Ok(())
    }

    async fn consume(&self, queue: QueueName, timeout: Duration) -> Result<Option<QueueTask>> {
        let mut conn = self.conn.clone();
        let key = self.queue_key(queue);

        let member = if timeout.is_zero() {
            let popped: Vec<(String, f64)> = conn.zpopmin(&key, 1).await?;
            popped.into_iter().next().map(|(member, _)| member)
        } else {
            // BZPOPMIN treats 0 as "block forever", so the non-blocking case
            // above never reaches here
            let popped: Option<(String, String, f64)> =
                conn.bzpopmin(&key, timeout.as_secs_f64()).await?;
            popped.map(|(_, member, _)| member)
        };

        match member {
            Some(member) => self.decode(&member).map(Some),
            None => Ok(None),
        }
    }

    async fn publish_result(&self, task_id: &str, payload: serde_json::Value) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                self.result_key(task_id),
                serde_json::to_string(&payload)?,
                RESULT_TTL.as_secs(),
            )
            .await?;
        Ok(())
    }

    async fn result(&self, task_id: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.result_key(task_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn publish_channel(&self, channel: &str, payload: serde_json::Value) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, serde_json::to_string(&payload)?).await?;
        Ok(())
    }

    async fn heartbeat(&self, service: &str, beat: &Heartbeat) -> Result<()> {
        let mut conn = self.conn.clone();
        let encoded = serde_json::to_string(beat)?;
        let _: () = conn
            .set_ex(self.heartbeat_key(service), &encoded, HEARTBEAT_TTL.as_secs())
            .await?;
        self.publish_channel(&format!("heartbeat:{service}"), serde_json::to_value(beat)?)
            .await
    }

    async fn last_heartbeat(&self, service: &str) -> Result<Option<Heartbeat>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.heartbeat_key(service)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn queue_depth(&self, queue: QueueName) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(self.queue_key(queue)).await?)
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "Redis ping failed");
                false
            }
        }
    }
}

fn queue_key(namespace: &str, queue: QueueName) -> String {
    format!("{namespace}:q:{queue}")
}

fn result_key(namespace: &str, task_id: &str) -> String {
    format!("{namespace}:result:{task_id}")
}

fn heartbeat_key(namespace: &str, service: &str) -> String {
    format!("{namespace}:heartbeat:{service}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(
            queue_key("applybox", QueueName::JobApplication),
            "applybox:q:job_application"
        );
        assert_eq!(result_key("applybox", "t1"), "applybox:result:t1");
        assert_eq!(
            heartbeat_key("applybox", "automation"),
            "applybox:heartbeat:automation"
        );
    }
}
