use crate::humanize::{ByteSize, Span};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Loaded from the environment only, never from TOML
    #[serde(skip)]
    pub secrets: Secrets,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub api: ApiLimits,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiLimits {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
    /// Profile ingestion is rate limited per client IP
    #[serde(default = "default_profile_rate_per_minute")]
    pub profile_rate_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            api: ApiLimits::default(),
        }
    }
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            profile_rate_per_minute: default_profile_rate_per_minute(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize(256 * 1024)
}

fn default_profile_rate_per_minute() -> u32 {
    5
}

/// Queue broker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Blocking-pop window; kept short so shutdown signals are observed
    #[serde(default = "default_consume_block")]
    pub consume_block: Span,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            namespace: default_namespace(),
            consume_block: default_consume_block(),
        }
    }
}

fn default_broker_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_namespace() -> String {
    "applybox".to_string()
}

fn default_consume_block() -> Span {
    Span(2)
}

/// Domain store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/store")
}

/// Dispatcher loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    /// Submission attempts per application before terminal ERROR
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// SUBMITTING rows untouched for this long are checked for lost workers
    #[serde(default = "default_stale_after")]
    pub stale_after: Span,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: Span,
    /// How long the result drain keeps running after a shutdown signal
    #[serde(default = "default_drain_grace")]
    pub drain_grace: Span,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            stale_after: default_stale_after(),
            maintenance_interval: default_maintenance_interval(),
            drain_grace: default_drain_grace(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_stale_after() -> Span {
    Span(600)
}

fn default_maintenance_interval() -> Span {
    Span(60)
}

fn default_drain_grace() -> Span {
    Span(30)
}

/// Automation worker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Transient re-publishes per task before terminal failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_action_attempts")]
    pub max_action_attempts: u32,
    /// Wall-clock ceiling for one form loop
    #[serde(default = "default_task_deadline")]
    pub task_deadline: Span,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Span,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: Span,
    #[serde(default = "default_browser_endpoint")]
    pub browser_endpoint: String,
    /// Per-command browser timeout in milliseconds (STAGEHAND_TIMEOUT)
    #[serde(default = "default_browser_timeout_ms")]
    pub browser_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_steps: default_max_steps(),
            max_action_attempts: default_max_action_attempts(),
            task_deadline: default_task_deadline(),
            heartbeat_interval: default_heartbeat_interval(),
            shutdown_grace: default_shutdown_grace(),
            browser_endpoint: default_browser_endpoint(),
            browser_timeout_ms: default_browser_timeout_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_steps() -> u32 {
    10
}

fn default_max_action_attempts() -> u32 {
    3
}

fn default_task_deadline() -> Span {
    Span(300)
}

fn default_heartbeat_interval() -> Span {
    Span(30)
}

fn default_shutdown_grace() -> Span {
    Span(60)
}

fn default_browser_endpoint() -> String {
    "http://127.0.0.1:7801".to_string()
}

fn default_browser_timeout_ms() -> u64 {
    30_000
}

/// SMS gateway configuration (credentials come from the environment)
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SmsConfig {
    pub endpoint: Option<String>,
    #[serde(default)]
    pub from_number: String,
    #[serde(default = "default_sms_timeout")]
    pub send_timeout: Span,
}

fn default_sms_timeout() -> Span {
    Span(10)
}

/// Drafting/scoring engine configuration (API key comes from the environment)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    pub endpoint: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub request_timeout: Span,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_llm_model(),
            request_timeout: default_llm_timeout(),
        }
    }
}

fn default_llm_model() -> String {
    "drafting-large".to_string()
}

fn default_llm_timeout() -> Span {
    Span(60)
}

/// Artifact blob-store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub public_base_url: Option<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            public_base_url: None,
        }
    }
}

fn default_bucket() -> String {
    "applybox-artifacts".to_string()
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_dead_letter_ttl")]
    pub dead_letter_ttl: Span,
    #[serde(default = "default_inbound_ttl")]
    pub inbound_ttl: Span,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            dead_letter_ttl: default_dead_letter_ttl(),
            inbound_ttl: default_inbound_ttl(),
        }
    }
}

fn default_dead_letter_ttl() -> Span {
    Span(30 * 86400)
}

fn default_inbound_ttl() -> Span {
    Span(30 * 86400)
}

/// Secrets loaded from the environment at startup, never serialized
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub api_key: Option<SecretString>,
    pub encryption_key: Option<SecretString>,
    pub sms_account_id: Option<String>,
    pub sms_auth_token: Option<SecretString>,
    pub sms_webhook_secret: Option<SecretString>,
    pub llm_api_key: Option<SecretString>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.server.api.profile_rate_per_minute, 5);
        assert_eq!(config.dispatcher.max_attempts, 3);
        assert_eq!(config.dispatcher.stale_after.as_secs(), 600);
        assert_eq!(config.worker.max_retries, 3);
        assert_eq!(config.worker.max_steps, 10);
        assert_eq!(config.worker.task_deadline.as_secs(), 300);
        assert_eq!(config.broker.consume_block.as_secs(), 2);
        assert!(config.secrets.api_key.is_none());
    }
}
