//! Vault error types.

use thiserror::Error;

/// Errors raised while sealing, opening or persisting blobs.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("AES-GCM sealing failed")]
    Seal,

    #[error("Sealed data could not be opened")]
    Open,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        VaultError::Storage(e.to_string())
    }
}
