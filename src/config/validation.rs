use secrecy::ExposeSecret;
use thiserror::Error;

use super::models::Config;
use crate::crypto::CredentialCipher;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("broker.consume_block must be between 1 and 5 seconds, got {0}s")]
    ConsumeBlockOutOfRange(u64),

    #[error("server.api.profile_rate_per_minute must be at least 1")]
    ZeroRateLimit,

    #[error("dispatcher.stale_after must be at least 60 seconds, got {0}s")]
    StaleTooShort(u64),

    #[error("dispatcher.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("worker.{0} must be at least 1")]
    ZeroWorkerBound(&'static str),

    #[error("worker.task_deadline must be at least 30 seconds, got {0}s")]
    DeadlineTooShort(u64),

    #[error("APPLYBOX_ENCRYPTION_KEY is invalid: {0}")]
    BadEncryptionKey(String),
}

/// Validate a loaded configuration before any component starts
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    let block = config.broker.consume_block.as_secs();
    if !(1..=5).contains(&block) {
        return Err(ValidationError::ConsumeBlockOutOfRange(block));
    }

    if config.server.api.profile_rate_per_minute == 0 {
        return Err(ValidationError::ZeroRateLimit);
    }

    let stale = config.dispatcher.stale_after.as_secs();
    if stale < 60 {
        return Err(ValidationError::StaleTooShort(stale));
    }

    if config.dispatcher.max_attempts == 0 {
        return Err(ValidationError::ZeroAttempts);
    }

    if config.worker.max_steps == 0 {
        return Err(ValidationError::ZeroWorkerBound("max_steps"));
    }
    if config.worker.max_action_attempts == 0 {
        return Err(ValidationError::ZeroWorkerBound("max_action_attempts"));
    }

    let deadline = config.worker.task_deadline.as_secs();
    if deadline < 30 {
        return Err(ValidationError::DeadlineTooShort(deadline));
    }

    // A present-but-broken key should fail at startup, not on first decrypt
    if let Some(key) = &config.secrets.encryption_key {
        CredentialCipher::from_base64(key.expose_secret())
            .map_err(|e| ValidationError::BadEncryptionKey(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::Span;
    use secrecy::SecretString;

    #[test]
    fn test_defaults_validate() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_consume_block_bounds() {
        let mut config = Config::default();
        config.broker.consume_block = Span(0);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::ConsumeBlockOutOfRange(0))
        ));
        config.broker.consume_block = Span(6);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_stale_floor() {
        let mut config = Config::default();
        config.dispatcher.stale_after = Span(10);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::StaleTooShort(10))
        ));
    }

    #[test]
    fn test_encryption_key_checked_at_startup() {
        let mut config = Config::default();
        config.secrets.encryption_key = Some(SecretString::from("not a key".to_string()));
        assert!(matches!(
            validate(&config),
            Err(ValidationError::BadEncryptionKey(_))
        ));

        config.secrets.encryption_key =
            Some(SecretString::from(CredentialCipher::generate_key()));
        assert!(validate(&config).is_ok());
    }
}
