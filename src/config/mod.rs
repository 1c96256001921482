//! Configuration management
//!
//! Layered loading: struct defaults, then a TOML file, then environment
//! variables (highest priority). Secrets come exclusively from the
//! environment.
//!
//! # Environment Variables
//!
//! Any key can be overridden with the pattern `APPLYBOX__<section>__<key>`:
//!
//! - `APPLYBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `APPLYBOX__BROKER__URL=redis://prod-redis:6379`
//! - `APPLYBOX__DISPATCHER__STALE_AFTER=15m`
//!
//! Deployment-conventional short names are also honored: `REDIS_URL`,
//! `MAX_RETRIES`, `STAGEHAND_TIMEOUT`, plus the secret variables
//! (`APPLYBOX_API_KEY`, `APPLYBOX_ENCRYPTION_KEY`, `SMS_*`, `LLM_API_KEY`).
//!
//! # Configuration File
//!
//! By default, configuration is loaded from `config/applybox.toml`; override
//! the path with `APPLYBOX_CONFIG`.

mod models;
mod sources;
mod validation;

pub use models::{
    ApiLimits, ArtifactConfig, BrokerConfig, Config, DispatcherConfig, LlmConfig, RetentionConfig,
    Secrets, ServerConfig, SmsConfig, StoreConfig, WorkerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[broker]
url = "redis://localhost:6379"

[sms]
from_number = "+15550001111"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.sms.from_number, "+15550001111");
    }

    #[test]
    fn test_validation_catches_bad_values() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[dispatcher]\nstale_after = \"5s\"\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError(
                ValidationError::StaleTooShort(5)
            ))
        ));
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"

[server.api]
max_payload_bytes = "128KB"
profile_rate_per_minute = 10

[broker]
url = "redis://redis:6379"
namespace = "applybox"
consume_block = "2s"

[store]
path = "data/store"

[dispatcher]
max_attempts = 3
stale_after = "10m"
maintenance_interval = "1m"
drain_grace = "30s"

[worker]
max_retries = 3
max_steps = 10
task_deadline = "5m"
heartbeat_interval = "30s"
browser_endpoint = "http://stagehand:7801"

[sms]
endpoint = "https://sms.example.com/v1/messages"
from_number = "+15550001111"

[llm]
endpoint = "https://llm.example.com/v1/draft"
model = "drafting-large"

[artifacts]
bucket = "applybox-artifacts"
public_base_url = "https://cdn.example.com"

[retention]
dead_letter_ttl = "30d"
inbound_ttl = "14d"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.server.api.max_payload_bytes.as_u64(), 128 * 1024);
        assert_eq!(config.server.api.profile_rate_per_minute, 10);
        assert_eq!(config.worker.browser_endpoint, "http://stagehand:7801");
        assert_eq!(config.retention.inbound_ttl.as_secs(), 14 * 86400);
        assert!(config.artifacts.public_base_url.is_some());
    }
}
