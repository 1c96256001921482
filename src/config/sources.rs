use super::models::Config;
use config::{ConfigError, Environment, File};
use secrecy::SecretString;
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "APPLYBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/applybox.toml";
const ENV_PREFIX: &str = "APPLYBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;

    load_secrets(&mut config);
    load_well_known_overrides(&mut config);

    Ok(config)
}

/// Load secrets from environment variables into config.
/// Secrets are never stored in TOML files, only in environment.
fn load_secrets(config: &mut Config) {
    let secret = |name: &str| env::var(name).ok().map(SecretString::from);

    config.secrets.api_key = secret("APPLYBOX_API_KEY");
    config.secrets.encryption_key = secret("APPLYBOX_ENCRYPTION_KEY");
    config.secrets.sms_account_id = env::var("SMS_ACCOUNT_ID").ok();
    config.secrets.sms_auth_token = secret("SMS_AUTH_TOKEN");
    config.secrets.sms_webhook_secret = secret("SMS_WEBHOOK_SECRET");
    config.secrets.llm_api_key = secret("LLM_API_KEY");
}

/// Short env names that deployments expect to work without the
/// APPLYBOX__SECTION__KEY spelling
fn load_well_known_overrides(config: &mut Config) {
    if let Ok(url) = env::var("REDIS_URL") {
        config.broker.url = url;
    }
    if let Ok(raw) = env::var("MAX_RETRIES") {
        match raw.parse() {
            Ok(value) => config.worker.max_retries = value,
            Err(_) => tracing::warn!(raw, "Ignoring unparseable MAX_RETRIES"),
        }
    }
    if let Ok(raw) = env::var("STAGEHAND_TIMEOUT") {
        match raw.parse() {
            Ok(value) => config.worker.browser_timeout_ms = value,
            Err(_) => tracing::warn!(raw, "Ignoring unparseable STAGEHAND_TIMEOUT"),
        }
    }
}

/// Load configuration from a specific path and environment.
/// Useful for testing with custom config files.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // APPLYBOX__SERVER__BIND_ADDR -> server.bind_addr
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
