//! In-memory broker for tests and single-process development
//!
//! Mirrors the Redis broker's ordering and TTL semantics without a server:
//! a binary heap per queue ordered by (priority desc, seq asc), TTL maps with
//! lazy expiry for results and heartbeats, and a channel log in place of real
//! pub/sub fan-out.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::{Broker, HEARTBEAT_TTL, RESULT_TTL, Result, new_task};
use crate::messages::{Heartbeat, QueueName, QueueTask, TaskId, TaskPayload};

struct Entry {
    priority: i32,
    seq: u64,
    task: QueueTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the lower sequence number
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    queues: Mutex<HashMap<QueueName, BinaryHeap<Entry>>>,
    wakers: HashMap<QueueName, Notify>,
    seq: AtomicU64,
    results: Mutex<HashMap<String, (Instant, serde_json::Value)>>,
    heartbeats: Mutex<HashMap<String, (Instant, Heartbeat)>>,
    channel_log: Mutex<Vec<(String, serde_json::Value)>>,
}

#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let wakers = QueueName::ALL
            .into_iter()
            .map(|queue| (queue, Notify::new()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                wakers,
                seq: AtomicU64::new(0),
                results: Mutex::new(HashMap::new()),
                heartbeats: Mutex::new(HashMap::new()),
                channel_log: Mutex::new(Vec::new()),
            }),
        }
    }

    async fn push(&self, task: QueueTask) {
        let queue = task.queue();
        let seq = self.inner.seq.fetch_add(1, AtomicOrdering::SeqCst);
        let entry = Entry {
            priority: task.priority,
            seq,
            task,
        };
        self.inner
            .queues
            .lock()
            .await
            .entry(queue)
            .or_default()
            .push(entry);
        self.inner.wakers[&queue].notify_one();
    }

    async fn pop(&self, queue: QueueName) -> Option<QueueTask> {
        self.inner
            .queues
            .lock()
            .await
            .get_mut(&queue)
            .and_then(|heap| heap.pop())
            .map(|entry| entry.task)
    }

    /// Channel messages published so far (test visibility)
    pub async fn channel_messages(&self, channel: &str) -> Vec<serde_json::Value> {
        self.inner
            .channel_log
            .lock()
            .await
            .iter()
            .filter(|(name, _)| name == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, payload: &TaskPayload, priority: i32) -> Result<TaskId> {
        let task = new_task(payload, priority);
        let id = task.id.clone();
        debug!(task_id = %id, queue = %task.queue(), "Task published");
        self.push(task).await;
        Ok(id)
    }

    async fn republish(&self, task: &QueueTask) -> Result<()> {
        debug!(task_id = %task.id, retries = task.retries, "Task republished");
        self.push(task.clone()).await;
        Ok(())
    }

    async fn consume(&self, queue: QueueName, timeout: Duration) -> Result<Option<QueueTask>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Arm the waker before checking so a concurrent publish cannot
            // slip between the check and the wait
            let notified = self.inner.wakers[&queue].notified();

            if let Some(task) = self.pop(queue).await {
                return Ok(Some(task));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    async fn publish_result(&self, task_id: &str, payload: serde_json::Value) -> Result<()> {
        self.inner
            .results
            .lock()
            .await
            .insert(task_id.to_string(), (Instant::now() + RESULT_TTL, payload));
        Ok(())
    }

    async fn result(&self, task_id: &str) -> Result<Option<serde_json::Value>> {
        let mut results = self.inner.results.lock().await;
        match results.get(task_id) {
            Some((expires, _)) if *expires <= Instant::now() => {
                results.remove(task_id);
                Ok(None)
            }
            Some((_, payload)) => Ok(Some(payload.clone())),
            None => Ok(None),
        }
    }

    async fn publish_channel(&self, channel: &str, payload: serde_json::Value) -> Result<()> {
        self.inner
            .channel_log
            .lock()
            .await
            .push((channel.to_string(), payload));
        Ok(())
    }

    async fn heartbeat(&self, service: &str, beat: &Heartbeat) -> Result<()> {
        self.inner.heartbeats.lock().await.insert(
            service.to_string(),
            (Instant::now() + HEARTBEAT_TTL, beat.clone()),
        );
        self.publish_channel(&format!("heartbeat:{service}"), serde_json::to_value(beat)?)
            .await
    }

    async fn last_heartbeat(&self, service: &str) -> Result<Option<Heartbeat>> {
        let mut heartbeats = self.inner.heartbeats.lock().await;
        match heartbeats.get(service) {
            Some((expires, _)) if *expires <= Instant::now() => {
                heartbeats.remove(service);
                Ok(None)
            }
            Some((_, beat)) => Ok(Some(beat.clone())),
            None => Ok(None),
        }
    }

    async fn queue_depth(&self, queue: QueueName) -> Result<usize> {
        Ok(self
            .inner
            .queues
            .lock()
            .await
            .get(&queue)
            .map(|heap| heap.len())
            .unwrap_or(0))
    }

    async fn ping(&self) -> bool {
        true
    }
}
