//! Authentication error types.

use thiserror::Error;
use vault::VaultError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Phone number already registered: {0}")]
    DuplicatePrincipal(String),

    #[error("Invalid phone number: {0}")]
    InvalidPrincipal(String),

    /// Deliberately carries no detail.
    #[error("Invalid token")]
    InvalidToken,

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
