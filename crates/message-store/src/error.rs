//! Message store errors.

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid TTL: {0} seconds")]
    InvalidTtl(i64),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Failed to decrypt message {0}")]
    Decryption(Uuid),

    #[error("Store operation timed out")]
    Timeout,

    #[error("Vault error: {0}")]
    Vault(#[from] vault::VaultError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
