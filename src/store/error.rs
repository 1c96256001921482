use thiserror::Error;

use super::machine::IllegalTransition;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: u64 },

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    #[error("Invalid value: {0}")]
    Validation(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
