//! Automation worker process
//!
//! Long-running consumer of `job_application`. Each task runs one bounded
//! form loop against one browser session and publishes exactly one terminal
//! outcome. Transient failures re-enqueue the task with exponential backoff;
//! liveness is advertised through `heartbeat:automation`.

pub mod browser;
pub mod fields;
pub mod questions;
pub mod runner;

pub use browser::{
    Browser, BrowserError, BrowserSession, FormField, HttpBrowser, PageKind, PageView,
    ScriptedBrowser,
};
pub use runner::{Outcome, RunLimits, TaskError};

use chrono::Utc;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::clients::artifacts::ArtifactStore;
use crate::config::Config;
use crate::messages::{
    ApprovalPageContext, ApprovalRequest, Heartbeat, HeartbeatStatus, JobApplicationTask,
    QueueName, QueueTask, TaskId, TaskPayload, UpdateJobStatus, WorkerStatus,
};
use crate::observability::Metrics;

/// Service name under which the worker publishes heartbeats
pub const HEARTBEAT_SERVICE: &str = "automation";

const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Runtime bounds for one worker process
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub max_retries: u32,
    pub limits: RunLimits,
    pub task_deadline: Duration,
    pub heartbeat_interval: Duration,
    pub consume_block: Duration,
    pub shutdown_grace: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.worker.max_retries,
            limits: RunLimits {
                max_steps: config.worker.max_steps,
                max_attempts: config.worker.max_action_attempts,
            },
            task_deadline: config.worker.task_deadline.as_duration(),
            heartbeat_interval: config.worker.heartbeat_interval.as_duration(),
            consume_block: config.broker.consume_block.as_duration(),
            shutdown_grace: config.worker.shutdown_grace.as_duration(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct AutomationWorker {
    broker: Arc<dyn Broker>,
    browser: Arc<dyn Browser>,
    artifacts: ArtifactStore,
    settings: WorkerSettings,
    metrics: Arc<Metrics>,
    in_flight: Arc<Mutex<Option<TaskId>>>,
}

impl AutomationWorker {
    pub fn new(
        broker: Arc<dyn Broker>,
        browser: Arc<dyn Browser>,
        artifacts: ArtifactStore,
        settings: WorkerSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            broker,
            browser,
            artifacts,
            settings,
            metrics,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Consume until the shutdown signal flips. Finishes the in-flight task
    /// (bounded by the grace period) before returning.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.broker.clone(),
            self.in_flight.clone(),
            self.settings.heartbeat_interval,
            shutdown.clone(),
        ));

        info!("Automation worker consuming job_application");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_one().await {
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "Broker unavailable, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        // Refuse new consumes; announce the wind-down
        let beat = Heartbeat {
            timestamp: Utc::now(),
            status: HeartbeatStatus::ShuttingDown,
            in_flight_task_id: self.current_task(),
        };
        if let Err(err) = self.broker.heartbeat(HEARTBEAT_SERVICE, &beat).await {
            warn!(error = %err, "Could not publish shutdown heartbeat");
        }
        heartbeat.abort();
        info!("Automation worker stopped");
    }

    fn current_task(&self) -> Option<TaskId> {
        self.in_flight.lock().ok().and_then(|guard| guard.clone())
    }

    fn set_current_task(&self, task_id: Option<TaskId>) {
        if let Ok(mut guard) = self.in_flight.lock() {
            *guard = task_id;
        }
    }

    /// Consume and fully handle at most one task. Returns whether a task was
    /// processed. Exposed so tests can drive the worker deterministically.
    pub async fn process_one(&self) -> Result<bool, crate::broker::BrokerError> {
        let Some(task) = self
            .broker
            .consume(QueueName::JobApplication, self.settings.consume_block)
            .await?
        else {
            return Ok(false);
        };

        self.set_current_task(Some(task.id.clone()));
        self.handle_task(task).await;
        self.set_current_task(None);
        Ok(true)
    }

    async fn handle_task(&self, task: QueueTask) {
        let TaskPayload::JobApplication(job) = &task.payload else {
            // Only job_application tasks belong on this queue; anything else
            // is a producer bug
            error!(task_id = %task.id, queue = %task.queue(), "Unexpected payload on job_application queue");
            return;
        };
        let job = job.clone();

        if task.is_expired(Utc::now()) {
            warn!(task_id = %task.id, application_id = job.application_id, "Task past retention, refusing stale credentials");
            self.publish_failure(&task, &job, "task exceeded its retention window")
                .await;
            return;
        }

        info!(
            task_id = %task.id,
            application_id = job.application_id,
            company = %job.company,
            title = %job.title,
            retries = task.retries,
            "Processing application task"
        );

        let result = self.run_with_deadline(&job).await;

        match result {
            Ok(outcome) => self.publish_outcome(&task, &job, outcome).await,
            Err(err) => self.retry_or_fail(task, &job, err).await,
        }
    }

    async fn run_with_deadline(&self, job: &JobApplicationTask) -> Result<Outcome, TaskError> {
        let mut session = self.browser.session().await.map_err(TaskError::from)?;

        let result = tokio::time::timeout(
            self.settings.task_deadline,
            runner::run_task(job, &mut session, &self.artifacts, self.settings.limits),
        )
        .await;

        // The session never survives past the outcome, whatever it was
        if let Err(err) = session.close().await {
            debug!(error = %err, "Session close failed");
        }

        match result {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(TaskError(format!(
                "form loop exceeded {}s wall clock",
                self.settings.task_deadline.as_secs()
            ))),
        }
    }

    async fn publish_outcome(&self, task: &QueueTask, job: &JobApplicationTask, outcome: Outcome) {
        match outcome {
            Outcome::Applied {
                confirmation,
                submitted_at,
                screenshot_url,
            } => {
                let update = UpdateJobStatus {
                    job_id: job.job_id,
                    application_id: job.application_id,
                    status: WorkerStatus::Applied,
                    notes: Some(confirmation),
                    error_message: None,
                    screenshot_url,
                    submitted_at: Some(submitted_at),
                };
                self.publish_update(task, update).await;
                self.metrics.application_submitted();
            }

            Outcome::NeedsApproval {
                question,
                state_blob,
                screenshot_url,
                page_title,
                page_url,
                form_fields,
            } => {
                let update = UpdateJobStatus {
                    job_id: job.job_id,
                    application_id: job.application_id,
                    status: WorkerStatus::WaitingApproval,
                    notes: None,
                    error_message: None,
                    screenshot_url: screenshot_url.clone(),
                    submitted_at: None,
                };
                self.publish_update(task, update).await;

                let request = ApprovalRequest {
                    job_id: job.job_id,
                    application_id: job.application_id,
                    question,
                    current_state: Some(state_blob),
                    screenshot_url,
                    context: Some(ApprovalPageContext {
                        page_title: Some(page_title),
                        page_url: Some(page_url),
                        form_fields: Some(form_fields),
                    }),
                };
                if let Err(err) = self
                    .broker
                    .publish(&TaskPayload::ApprovalRequest(request), 0)
                    .await
                {
                    error!(task_id = %task.id, error = %err, "Failed to publish approval request");
                }
                self.metrics.approval_requested();
            }

            Outcome::NeedsUserInfo { reason } => {
                let update = UpdateJobStatus {
                    job_id: job.job_id,
                    application_id: job.application_id,
                    status: WorkerStatus::NeedsUserInfo,
                    notes: Some(reason),
                    error_message: None,
                    screenshot_url: None,
                    submitted_at: None,
                };
                self.publish_update(task, update).await;
            }
        }
    }

    async fn retry_or_fail(&self, mut task: QueueTask, job: &JobApplicationTask, err: TaskError) {
        if task.retries < self.settings.max_retries {
            task.retries += 1;
            let backoff = backoff_for(task.retries);
            warn!(
                task_id = %task.id,
                application_id = job.application_id,
                retries = task.retries,
                backoff_secs = backoff.as_secs(),
                error = %err,
                "Task failed, re-publishing with backoff"
            );
            tokio::time::sleep(backoff).await;
            match self.broker.republish(&task).await {
                Ok(()) => self.metrics.task_published(),
                Err(publish_err) => {
                    // The task is lost from the broker; the dispatcher's
                    // maintenance loop will notice the stuck application
                    error!(task_id = %task.id, error = %publish_err, "Could not re-publish task");
                }
            }
        } else {
            warn!(
                task_id = %task.id,
                application_id = job.application_id,
                retries = task.retries,
                error = %err,
                "Retry budget exhausted, reporting failure"
            );
            self.publish_failure(&task, job, &err.0).await;
        }
    }

    async fn publish_failure(&self, task: &QueueTask, job: &JobApplicationTask, error: &str) {
        let update = UpdateJobStatus {
            job_id: job.job_id,
            application_id: job.application_id,
            status: WorkerStatus::Failed,
            notes: None,
            error_message: Some(error.to_string()),
            screenshot_url: None,
            submitted_at: None,
        };
        self.publish_update(task, update).await;
        self.metrics.application_failed();
    }

    async fn publish_update(&self, task: &QueueTask, update: UpdateJobStatus) {
        match serde_json::to_value(&update) {
            Ok(result) => {
                if let Err(err) = self.broker.publish_result(&task.id, result).await {
                    warn!(task_id = %task.id, error = %err, "Failed to store result record");
                }
            }
            Err(err) => warn!(task_id = %task.id, error = %err, "Result encode failed"),
        }

        if let Err(err) = self
            .broker
            .publish(&TaskPayload::UpdateJobStatus(update), 0)
            .await
        {
            error!(task_id = %task.id, error = %err, "Failed to publish status update");
        }
        self.metrics.result_processed();
    }
}

/// Exponential backoff for worker-level retries: min(2^retries, 30) seconds
/// plus a little jitter so parallel workers do not stampede
fn backoff_for(retries: u32) -> Duration {
    let base = Duration::from_secs(2u64.saturating_pow(retries)).min(BACKOFF_CAP);
    let jitter = rand::thread_rng().gen_range(0..250);
    base + Duration::from_millis(jitter)
}

async fn heartbeat_loop(
    broker: Arc<dyn Broker>,
    in_flight: Arc<Mutex<Option<TaskId>>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }

        let current = in_flight.lock().ok().and_then(|guard| guard.clone());
        let beat = Heartbeat {
            timestamp: Utc::now(),
            status: if current.is_some() {
                HeartbeatStatus::Busy
            } else {
                HeartbeatStatus::Idle
            },
            in_flight_task_id: current,
        };
        if let Err(err) = broker.heartbeat(HEARTBEAT_SERVICE, &beat).await {
            warn!(error = %err, "Heartbeat publish failed");
        }
    }
}

/// Entry point for `applybox worker`
pub async fn run_process(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let broker: Arc<dyn Broker> = Arc::new(
        crate::broker::RedisBroker::connect(&config.broker.url, &config.broker.namespace).await?,
    );
    let browser: Arc<dyn Browser> = Arc::new(HttpBrowser::new(
        config.worker.browser_endpoint.clone(),
        Duration::from_millis(config.worker.browser_timeout_ms),
    )?);
    let artifacts = ArtifactStore::in_memory();
    let settings = WorkerSettings::from_config(&config);
    let grace = settings.shutdown_grace;
    let metrics = Arc::new(Metrics::new());

    let worker = Arc::new(AutomationWorker::new(
        broker, browser, artifacts, settings, metrics,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let runner = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run(shutdown_rx).await })
    };

    // The run loop returns once the in-flight task completes; cap that wait
    match tokio::time::timeout(grace + Duration::from_secs(300), runner).await {
        Ok(_) => Ok(()),
        Err(_) => {
            warn!("Worker did not stop within grace period");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => error!(error = %err, "Failed to install signal handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::messages::{Credentials, UserData};
    use crate::worker::browser::PageView;

    fn job_task() -> TaskPayload {
        TaskPayload::JobApplication(JobApplicationTask {
            job_id: 42,
            job_url: "https://boards.example.com/acme/staff".to_string(),
            company: "Acme".to_string(),
            title: "Staff Engineer".to_string(),
            application_id: 7,
            user_data: UserData {
                name: "Dana Smith".to_string(),
                email: "dana@example.com".to_string(),
                phone: "+15551230000".to_string(),
                resume_url: Some("memory://a/resume.md".to_string()),
                cover_letter_url: Some("memory://a/cover.md".to_string()),
                ..Default::default()
            },
            credentials: Some(Credentials {
                username: "dana".to_string(),
                password: "hunter2".to_string(),
            }),
            custom_answers: None,
            ai_instructions: None,
            resume_from: None,
        })
    }

    fn form_page() -> PageView {
        PageView {
            kind: PageKind::ApplicationForm,
            url: "https://boards.example.com/acme/apply".to_string(),
            title: "Apply".to_string(),
            fields: Vec::new(),
            questions: Vec::new(),
            confirmation_text: None,
            has_password_field: false,
        }
    }

    fn confirmation_page() -> PageView {
        PageView {
            kind: PageKind::Confirmation,
            url: "https://boards.example.com/acme/done".to_string(),
            title: "Thanks".to_string(),
            fields: Vec::new(),
            questions: Vec::new(),
            confirmation_text: Some("Application received, ref XYZ".to_string()),
            has_password_field: false,
        }
    }

    fn worker_with(browser: ScriptedBrowser, broker: MemoryBroker) -> AutomationWorker {
        let mut settings = WorkerSettings::default();
        settings.consume_block = Duration::ZERO;
        AutomationWorker::new(
            Arc::new(broker),
            Arc::new(browser),
            ArtifactStore::in_memory(),
            settings,
            Arc::new(Metrics::new()),
        )
    }

    async fn consume_update(broker: &MemoryBroker) -> UpdateJobStatus {
        let task = broker
            .consume(QueueName::UpdateJobStatus, Duration::ZERO)
            .await
            .unwrap()
            .expect("expected a status update");
        match task.payload {
            TaskPayload::UpdateJobStatus(update) => update,
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_publishes_exactly_one_terminal_outcome() {
        let broker = MemoryBroker::new();
        let browser = ScriptedBrowser::new(vec![form_page(), confirmation_page()]);
        let worker = worker_with(browser, broker.clone());

        let task_id = broker.publish(&job_task(), 0).await.unwrap();
        assert!(worker.process_one().await.unwrap());

        let update = consume_update(&broker).await;
        assert_eq!(update.status, WorkerStatus::Applied);
        assert_eq!(update.application_id, 7);
        assert!(update.submitted_at.is_some());
        assert_eq!(update.notes.as_deref(), Some("Application received, ref XYZ"));

        // No second terminal outcome
        assert_eq!(broker.queue_depth(QueueName::UpdateJobStatus).await.unwrap(), 0);
        // Result record mirrors the update
        let result = broker.result(&task_id).await.unwrap().unwrap();
        assert_eq!(result["status"], "applied");
    }

    #[tokio::test]
    async fn test_needs_approval_publishes_status_and_request() {
        let broker = MemoryBroker::new();
        let mut page = form_page();
        page.questions = vec!["Do you require visa sponsorship?".to_string()];
        let worker = worker_with(ScriptedBrowser::new(vec![page]), broker.clone());

        broker.publish(&job_task(), 0).await.unwrap();
        worker.process_one().await.unwrap();

        let update = consume_update(&broker).await;
        assert_eq!(update.status, WorkerStatus::WaitingApproval);

        let request = broker
            .consume(QueueName::ApprovalRequest, Duration::ZERO)
            .await
            .unwrap()
            .expect("expected an approval request");
        match request.payload {
            TaskPayload::ApprovalRequest(request) => {
                assert_eq!(request.question, "Do you require visa sponsorship?");
                assert!(request.current_state.is_some());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_republishes_with_backoff() {
        let broker = MemoryBroker::new();
        let browser = ScriptedBrowser::new(vec![form_page()]);
        // More consecutive failures than sub-attempts, so the run errors
        browser.fail_submits(3);
        // Top up pages for the retried run
        browser.extend_script(vec![form_page(), confirmation_page()]);
        let worker = worker_with(browser, broker.clone());

        let original_id = broker.publish(&job_task(), 0).await.unwrap();

        // Paused time lets the backoff sleep auto-advance
        tokio::time::pause();
        worker.process_one().await.unwrap();
        worker.process_one().await.unwrap();
        tokio::time::resume();

        let update = consume_update(&broker).await;
        assert_eq!(update.status, WorkerStatus::Applied);
        // The retried task kept its identity
        let result = broker.result(&original_id).await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_is_terminal_failure() {
        let broker = MemoryBroker::new();
        let browser = ScriptedBrowser::new(Vec::new());
        // Every run fails immediately: script exhausted on open
        let mut settings = WorkerSettings::default();
        settings.consume_block = Duration::ZERO;
        settings.max_retries = 0;
        let worker = AutomationWorker::new(
            Arc::new(broker.clone()),
            Arc::new(browser),
            ArtifactStore::in_memory(),
            settings,
            Arc::new(Metrics::new()),
        );

        broker.publish(&job_task(), 0).await.unwrap();
        worker.process_one().await.unwrap();

        let update = consume_update(&broker).await;
        assert_eq!(update.status, WorkerStatus::Failed);
        assert!(update.error_message.is_some());
        // Nothing was re-enqueued
        assert_eq!(broker.queue_depth(QueueName::JobApplication).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_task_is_refused() {
        let broker = MemoryBroker::new();
        let worker = worker_with(ScriptedBrowser::new(Vec::new()), broker.clone());

        broker.publish(&job_task(), 0).await.unwrap();
        let mut task = broker
            .consume(QueueName::JobApplication, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        task.expires_at = Some(Utc::now() - chrono::Duration::seconds(10));
        broker.republish(&task).await.unwrap();

        worker.process_one().await.unwrap();
        let update = consume_update(&broker).await;
        assert_eq!(update.status, WorkerStatus::Failed);
        assert!(update.error_message.unwrap().contains("retention"));
    }

    #[test]
    fn test_backoff_progression() {
        assert!(backoff_for(1) >= Duration::from_secs(2));
        assert!(backoff_for(1) < Duration::from_secs(3));
        assert!(backoff_for(3) >= Duration::from_secs(8));
        // Cap at 30s (plus jitter)
        assert!(backoff_for(10) < Duration::from_secs(31));
    }
}
