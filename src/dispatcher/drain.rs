//! Result drain: applies worker outcomes to the store
//!
//! One message at a time per application (keyed mutex), status precondition
//! checked under the lock so redelivered messages are no-ops. Unknown
//! application ids go to the dead-letter log and are dropped.

use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

use super::{Dispatcher, Result};
use crate::messages::{
    ApprovalRequest, QueueName, QueueTask, SendNotification, TaskPayload, UpdateJobStatus,
    WorkerStatus,
};
use crate::store::{ApplicationStatus, ApprovalContext, Event, Role, RoleStatus};

const NOTIFICATION_RETRIES: u32 = 3;

impl Dispatcher {
    pub(crate) async fn status_drain_loop(&self, shutdown: watch::Receiver<bool>) {
        self.drain_loop(QueueName::UpdateJobStatus, shutdown).await;
    }

    pub(crate) async fn approval_drain_loop(&self, shutdown: watch::Receiver<bool>) {
        self.drain_loop(QueueName::ApprovalRequest, shutdown).await;
    }

    pub(crate) async fn notification_drain_loop(&self, shutdown: watch::Receiver<bool>) {
        self.drain_loop(QueueName::SendNotification, shutdown).await;
    }

    async fn drain_loop(&self, queue: QueueName, shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.drain_one(queue, self.settings.consume_block).await {
                Ok(_) => {}
                Err(err) => {
                    warn!(queue = %queue, error = %err, "Drain error, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        // Finish what is already queued, bounded by the drain grace window
        let deadline = Instant::now() + self.settings.drain_grace;
        while Instant::now() < deadline {
            match self.drain_one(queue, Duration::ZERO).await {
                Ok(true) => {}
                _ => break,
            }
        }
    }

    /// Consume and handle at most one message from a result queue. Exposed
    /// so tests can drive the dispatcher deterministically.
    pub async fn drain_one(&self, queue: QueueName, timeout: Duration) -> Result<bool> {
        let Some(task) = self.broker.consume(queue, timeout).await? else {
            return Ok(false);
        };

        match task.payload.clone() {
            TaskPayload::UpdateJobStatus(msg) => self.handle_status(msg).await?,
            TaskPayload::ApprovalRequest(msg) => self.handle_approval(msg).await?,
            TaskPayload::SendNotification(msg) => self.handle_notification(&task, msg).await,
            TaskPayload::JobApplication(_) => {
                // A job task on a result queue is a producer bug
                self.store.record_dead_letter(
                    queue.as_str(),
                    "job_application payload on a result queue",
                    serde_json::to_value(&task)?,
                )?;
                self.metrics.dead_letter();
            }
        }
        Ok(true)
    }

    async fn handle_status(&self, msg: UpdateJobStatus) -> Result<()> {
        let Some(app) = self.store.application(msg.application_id)? else {
            self.store.record_dead_letter(
                "update_job_status",
                "unknown application_id",
                serde_json::to_value(&msg)?,
            )?;
            self.metrics.dead_letter();
            return Ok(());
        };

        let lock = self.store.lock_application(app.id);
        let _guard = lock.lock().await;

        let Some(app) = self.store.application(msg.application_id)? else {
            return Ok(());
        };

        // Idempotency shield: only SUBMITTING accepts worker outcomes; a
        // redelivered terminal update is ignored and logged
        if app.status != ApplicationStatus::Submitting {
            info!(
                application_id = app.id,
                status = %app.status,
                incoming = ?msg.status,
                "Ignoring status update for application not in submitting"
            );
            return Ok(());
        }

        let role = self.store.role(app.role_id)?;

        match msg.status {
            WorkerStatus::Applied => {
                let submitted_at = msg.submitted_at.unwrap_or_else(Utc::now);
                self.store.apply_event(
                    app.id,
                    &Event::WorkerApplied {
                        submitted_at,
                        notes: msg.notes.clone(),
                        screenshot_url: msg.screenshot_url.clone(),
                    },
                )?;
                self.advance_role(&role, RoleStatus::Applied);
                self.metrics.application_submitted();

                let mut body = format!("✅ Applied to {}", describe(&role));
                if let Some(reference) = &msg.notes {
                    body.push_str(&format!(" — {reference}"));
                }
                self.notify_profile_id(app.profile_id, body).await;
            }

            WorkerStatus::Failed => {
                let error = msg
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "application failed".to_string());
                self.store
                    .apply_event(app.id, &Event::WorkerFailed { error: error.clone() })?;
                self.advance_role(&role, RoleStatus::Ranked);
                self.metrics.application_failed();

                self.notify_profile_id(
                    app.profile_id,
                    format!("❌ Application to {} failed: {error}", describe(&role)),
                )
                .await;
            }

            WorkerStatus::WaitingApproval => {
                // The matching approval_request carries the question and the
                // page snapshot; the user is notified when it lands
                self.store
                    .apply_event(app.id, &Event::WorkerNeedsApproval { context: None })?;
            }

            WorkerStatus::NeedsUserInfo => {
                self.store.apply_event(app.id, &Event::WorkerNeedsUserInfo)?;
                let detail = msg
                    .notes
                    .clone()
                    .unwrap_or_else(|| "more profile data is needed".to_string());
                self.notify_profile_id(
                    app.profile_id,
                    format!("ℹ️ Paused on {}: {detail}", describe(&role)),
                )
                .await;
            }
        }

        self.metrics.result_processed();
        Ok(())
    }

    async fn handle_approval(&self, msg: ApprovalRequest) -> Result<()> {
        let Some(app) = self.store.application(msg.application_id)? else {
            self.store.record_dead_letter(
                "approval_request",
                "unknown application_id",
                serde_json::to_value(&msg)?,
            )?;
            self.metrics.dead_letter();
            return Ok(());
        };

        let lock = self.store.lock_application(app.id);
        let _guard = lock.lock().await;

        let Some(app) = self.store.application(msg.application_id)? else {
            return Ok(());
        };
        // Queues are not ordered relative to each other: the request may land
        // before or after the matching status update
        if !matches!(
            app.status,
            ApplicationStatus::Submitting | ApplicationStatus::WaitingApproval
        ) {
            info!(
                application_id = app.id,
                status = %app.status,
                "Ignoring approval request for settled application"
            );
            return Ok(());
        }

        let context = ApprovalContext {
            question: msg.question.clone(),
            page_url: msg.context.as_ref().and_then(|c| c.page_url.clone()),
            state_blob: msg.current_state.clone(),
            screenshot_url: msg.screenshot_url.clone(),
            asked_at: Utc::now(),
        };
        self.store.set_approval_context(app.id, context)?;
        self.metrics.approval_requested();

        let role = self.store.role(app.role_id)?;
        self.notify_profile_id(
            app.profile_id,
            format!(
                "🤔 Need approval for {}. Question: {}",
                describe(&role),
                msg.question
            ),
        )
        .await;
        Ok(())
    }

    async fn handle_notification(&self, task: &QueueTask, msg: SendNotification) {
        match self.sms.send(&msg.to, &msg.body).await {
            Ok(()) => self.metrics.notification_sent(),
            Err(err) if task.retries < NOTIFICATION_RETRIES => {
                warn!(task_id = %task.id, error = %err, "SMS send failed, re-queueing");
                let mut retry = task.clone();
                retry.retries += 1;
                if let Err(err) = self.broker.republish(&retry).await {
                    warn!(task_id = %task.id, error = %err, "Notification re-queue failed");
                }
            }
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "Dropping undeliverable notification");
            }
        }
    }

    fn advance_role(&self, role: &Option<Role>, to: RoleStatus) {
        if let Some(role) = role {
            if let Err(err) = self.store.set_role_status(role.id, to) {
                warn!(role_id = role.id, error = %err, "Role status not changed");
            }
        }
    }
}

fn describe(role: &Option<Role>) -> String {
    match role {
        Some(role) => format!("{} at {}", role.title, role.company),
        None => "the position".to_string(),
    }
}
