//! Credential sealing with AES-256-GCM
//!
//! Stored credentials are authenticated ciphertext: a random 96-bit nonce
//! followed by the GCM output. The process-wide key is loaded once at startup
//! from `APPLYBOX_ENCRYPTION_KEY` (URL-safe base64, 32 bytes). A failed open
//! is a hard error: tampered or wrong-key blobs never decay into empty
//! strings.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key is not valid base64: {0}")]
    KeyEncoding(#[from] base64::DecodeError),

    #[error("encryption key must be {KEY_LEN} bytes, got {0}")]
    KeyLength(usize),

    #[error("ciphertext too short: {0} bytes")]
    TruncatedCiphertext(usize),

    #[error("authenticated decryption failed")]
    OpenFailed,

    #[error("encryption failed")]
    SealFailed,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Process-wide cipher for credential storage
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Build a cipher from a URL-safe base64 key (32 bytes decoded)
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim();
        let bytes = URL_SAFE
            .decode(trimmed)
            .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))?;
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::KeyLength(bytes.len()));
        }
        let cipher =
            Aes256Gcm::new_from_slice(&bytes).map_err(|_| CryptoError::KeyLength(bytes.len()))?;
        Ok(Self { cipher })
    }

    /// Generate a fresh key in the accepted encoding (operator bootstrap)
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        URL_SAFE.encode(key)
    }

    /// Seal plaintext into `nonce || ciphertext`
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::SealFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a `nonce || ciphertext` blob, verifying the authentication tag
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() <= NONCE_LEN {
            return Err(CryptoError::TruncatedCiphertext(blob.len()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::OpenFailed)
    }

    /// Open a blob and interpret it as UTF-8
    pub fn open_string(&self, blob: &[u8]) -> Result<String> {
        let bytes = self.open(blob)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::OpenFailed)
    }
}
