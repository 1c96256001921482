//! Observability stubs (metrics, tracing)

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters across dispatcher and worker
#[derive(Debug, Default)]
pub struct Metrics {
    tasks_published: AtomicU64,
    results_processed: AtomicU64,
    applications_submitted: AtomicU64,
    applications_failed: AtomicU64,
    approvals_requested: AtomicU64,
    notifications_sent: AtomicU64,
    dead_letters: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_published(&self) {
        self.tasks_published.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "tasks_published", "Metric incremented");
    }

    pub fn result_processed(&self) {
        self.results_processed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "results_processed", "Metric incremented");
    }

    pub fn application_submitted(&self) {
        self.applications_submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "applications_submitted", "Metric incremented");
    }

    pub fn application_failed(&self) {
        self.applications_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "applications_failed", "Metric incremented");
    }

    pub fn approval_requested(&self) {
        self.approvals_requested.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "approvals_requested", "Metric incremented");
    }

    pub fn notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "notifications_sent", "Metric incremented");
    }

    pub fn dead_letter(&self) {
        self.dead_letters.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "dead_letters", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_published: self.tasks_published.load(Ordering::Relaxed),
            results_processed: self.results_processed.load(Ordering::Relaxed),
            applications_submitted: self.applications_submitted.load(Ordering::Relaxed),
            applications_failed: self.applications_failed.load(Ordering::Relaxed),
            approvals_requested: self.approvals_requested.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub tasks_published: u64,
    pub results_processed: u64,
    pub applications_submitted: u64,
    pub applications_failed: u64,
    pub approvals_requested: u64,
    pub notifications_sent: u64,
    pub dead_letters: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.task_published();
        metrics.task_published();
        metrics.application_submitted();

        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_published, 2);
        assert_eq!(snap.applications_submitted, 1);
        assert_eq!(snap.applications_failed, 0);
    }
}
