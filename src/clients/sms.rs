//! SMS gateway seam: outbound sends and inbound webhook verification
//!
//! The dispatcher only ever enqueues notifications; a drain loop hands them
//! to [`SmsGateway::send`]. Inbound webhooks are authenticated with an
//! HMAC-SHA256 signature over the raw request body, compared in constant
//! time. Signature failure is a security error and is never retried.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::Mutex;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SmsError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("gateway not configured")]
    NotConfigured,
}

pub type Result<T> = std::result::Result<T, SmsError>;

/// Outbound SMS primitive
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<()>;

    /// Whether the gateway can actually deliver (health reporting)
    fn is_configured(&self) -> bool {
        true
    }
}

/// HTTP gateway speaking the provider's form-POST dialect
pub struct HttpSmsGateway {
    client: reqwest::Client,
    endpoint: String,
    from_number: String,
    account_id: String,
    auth_token: SecretString,
}

impl HttpSmsGateway {
    pub fn new(
        endpoint: String,
        from_number: String,
        account_id: String,
        auth_token: SecretString,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmsError::SendFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            from_number,
            account_id,
            auth_token,
        })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.account_id, Some(self.auth_token.expose_secret()))
            .form(&[
                ("From", self.from_number.as_str()),
                ("To", to),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| SmsError::SendFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SmsError::SendFailed(format!(
                "HTTP {} from SMS gateway",
                status.as_u16()
            )));
        }

        tracing::info!(to, "SMS sent");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundSms {
    pub to: String,
    pub body: String,
}

/// Capturing gateway for tests and offline development
#[derive(Debug, Default)]
pub struct MemorySms {
    sent: Mutex<Vec<OutboundSms>>,
}

impl MemorySms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundSms> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SmsGateway for MemorySms {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(OutboundSms {
                to: to.to_string(),
                body: body.to_string(),
            });
        }
        Ok(())
    }
}

/// Base64 HMAC-SHA256 of the raw webhook body
pub fn compute_signature(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a provided webhook signature
pub fn verify_signature(secret: &str, body: &[u8], provided: &str) -> bool {
    let Some(expected) = compute_signature(secret, body) else {
        return false;
    };
    let Ok(provided_raw) = STANDARD.decode(provided.trim()) else {
        return false;
    };
    let Ok(expected_raw) = STANDARD.decode(&expected) else {
        return false;
    };
    expected_raw.ct_eq(&provided_raw).into()
}
