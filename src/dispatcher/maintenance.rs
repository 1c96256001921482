//! Maintenance loop: lost-worker detection and retention pruning
//!
//! Applications stuck in SUBMITTING past the staleness window are checked
//! against the automation heartbeat; an orphaned task means the worker died
//! between consume and publish, so the row moves to ERROR and, budget
//! permitting, a fresh task is published.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{Dispatcher, Result};
use crate::store::{ApplicationStatus, Event};
use crate::worker::HEARTBEAT_SERVICE;

impl Dispatcher {
    pub(crate) async fn maintenance_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.maintenance_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.maintenance_once().await {
                warn!(error = %err, "Maintenance pass failed");
            }
        }
    }

    /// One maintenance pass. Exposed so tests can trigger it directly.
    pub async fn maintenance_once(&self) -> Result<()> {
        self.reap_lost_workers().await?;
        self.store.prune_expired(&self.settings.retention)?;
        Ok(())
    }

    async fn reap_lost_workers(&self) -> Result<()> {
        let cutoff = Utc::now() - self.settings.stale_after;
        let stuck = self.store.stuck_submitting(cutoff)?;
        if stuck.is_empty() {
            return Ok(());
        }

        let heartbeat = self.broker.last_heartbeat(HEARTBEAT_SERVICE).await?;

        for app in stuck {
            // A live worker still holding this exact task gets more time
            let worker_has_it = heartbeat
                .as_ref()
                .is_some_and(|beat| beat.in_flight_task_id == app.queue_task_id);
            if worker_has_it {
                continue;
            }

            let lock = self.store.lock_application(app.id);
            let _guard = lock.lock().await;

            // Re-check under the lock; the result may have just drained
            let Some(current) = self.store.application(app.id)? else {
                continue;
            };
            if current.status != ApplicationStatus::Submitting || current.updated_at >= cutoff {
                continue;
            }

            warn!(
                application_id = current.id,
                task_id = ?current.queue_task_id,
                "Worker lost, failing stuck application"
            );
            let failed = self.store.apply_event(current.id, &Event::WorkerLost)?;

            if failed.attempts < self.settings.max_attempts {
                match self.retry_after_loss(failed.id).await {
                    Ok(task_id) => {
                        info!(application_id = failed.id, task_id = %task_id, "Stuck application re-published");
                        continue;
                    }
                    Err(err) => {
                        warn!(application_id = failed.id, error = %err, "Retry after worker loss failed");
                    }
                }
            }

            self.notify_profile_id(
                failed.profile_id,
                "⚠️ An application stalled (worker lost) and its retry budget is spent."
                    .to_string(),
            )
            .await;
        }
        Ok(())
    }

    /// ERROR → READY_TO_SUBMIT → SUBMITTING with a fresh task. Caller holds
    /// the application lock.
    async fn retry_after_loss(&self, application_id: u64) -> Result<crate::messages::TaskId> {
        let app = self.store.apply_event(application_id, &Event::RetryRequested)?;
        let profile = self
            .store
            .profile(app.profile_id)?
            .ok_or(super::DispatchError::ProfileNotFound(app.profile_id))?;
        let role = self
            .store
            .role(app.role_id)?
            .ok_or(super::DispatchError::RoleNotFound(app.role_id))?;
        self.publish_application_task(&app, &profile, &role, None)
            .await
    }
}
