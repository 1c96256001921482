//! Dispatcher: owns every write to the application store
//!
//! Three concurrent loops share one `Dispatcher`: trigger intake (called from
//! the HTTP and SMS surfaces), result drain (`update_job_status`,
//! `approval_request`, `send_notification`), and a maintenance tick. A
//! per-application mutex serializes transitions so redelivered results stay
//! idempotent.

mod drain;
mod intake;
mod maintenance;

pub use intake::TriggerOutcome;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::broker::{Broker, BrokerError};
use crate::clients::artifacts::{ArtifactError, ArtifactStore};
use crate::clients::llm::{DocumentEngine, EngineError};
use crate::clients::sms::{SmsError, SmsGateway};
use crate::config::Config;
use crate::crypto::CredentialCipher;
use crate::messages::{SendNotification, TaskPayload};
use crate::observability::Metrics;
use crate::store::{AppStore, Profile, RetentionPolicy, StoreError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("document engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("artifact store error: {0}")]
    Artifacts(#[from] ArtifactError),

    #[error("sms gateway error: {0}")]
    Sms(#[from] SmsError),

    #[error("profile not found: {0}")]
    ProfileNotFound(u64),

    #[error("role not found: {0}")]
    RoleNotFound(u64),

    #[error("application {0} exhausted its attempt budget")]
    BudgetExceeded(u64),

    #[error("applications are paused; text 'start' to resume")]
    Paused,
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Dispatcher tunables, lifted out of [`Config`]
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_attempts: u32,
    pub stale_after: chrono::Duration,
    pub maintenance_interval: Duration,
    pub consume_block: Duration,
    pub drain_grace: Duration,
    pub retention: RetentionPolicy,
}

impl DispatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.dispatcher.max_attempts,
            stale_after: chrono::Duration::seconds(config.dispatcher.stale_after.as_secs() as i64),
            maintenance_interval: config.dispatcher.maintenance_interval.as_duration(),
            consume_block: config.broker.consume_block.as_duration(),
            drain_grace: config.dispatcher.drain_grace.as_duration(),
            retention: RetentionPolicy {
                dead_letter_ttl: chrono::Duration::seconds(
                    config.retention.dead_letter_ttl.as_secs() as i64,
                ),
                inbound_ttl: chrono::Duration::seconds(
                    config.retention.inbound_ttl.as_secs() as i64
                ),
            },
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Dispatcher {
    pub(crate) store: Arc<AppStore>,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) engine: Arc<dyn DocumentEngine>,
    pub(crate) artifacts: ArtifactStore,
    pub(crate) sms: Arc<dyn SmsGateway>,
    pub(crate) cipher: Option<Arc<CredentialCipher>>,
    pub(crate) settings: DispatcherSettings,
    pub(crate) metrics: Arc<Metrics>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<AppStore>,
        broker: Arc<dyn Broker>,
        engine: Arc<dyn DocumentEngine>,
        artifacts: ArtifactStore,
        sms: Arc<dyn SmsGateway>,
        cipher: Option<Arc<CredentialCipher>>,
        settings: DispatcherSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            broker,
            engine,
            artifacts,
            sms,
            cipher,
            settings,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<AppStore> {
        &self.store
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Run the drain and maintenance loops until shutdown. Intake has no loop
    /// of its own; the HTTP/SMS surfaces call into the dispatcher directly.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!("Dispatcher loops starting");
        tokio::join!(
            self.status_drain_loop(shutdown.clone()),
            self.approval_drain_loop(shutdown.clone()),
            self.notification_drain_loop(shutdown.clone()),
            self.maintenance_loop(shutdown.clone()),
        );
        if let Err(err) = self.store.persist() {
            warn!(error = %err, "Final store persist failed");
        }
        info!("Dispatcher loops stopped");
    }

    /// Queue a user-facing SMS; delivery happens in the notification drain
    pub(crate) async fn enqueue_notification(&self, profile: &Profile, body: String) {
        let payload = TaskPayload::SendNotification(SendNotification {
            profile_id: profile.id,
            to: profile.phone.clone(),
            body,
        });
        if let Err(err) = self.broker.publish(&payload, 0).await {
            warn!(profile_id = profile.id, error = %err, "Could not enqueue notification");
        }
    }

    pub(crate) async fn notify_profile_id(&self, profile_id: u64, body: String) {
        match self.store.profile(profile_id) {
            Ok(Some(profile)) => self.enqueue_notification(&profile, body).await,
            Ok(None) => warn!(profile_id, "Notification for unknown profile dropped"),
            Err(err) => warn!(profile_id, error = %err, "Profile load failed for notification"),
        }
    }
}
