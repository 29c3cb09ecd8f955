//! Error types for the relay server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use message_store::StoreError;
use relay_auth::AuthError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use vault::VaultError;

/// Relay error types.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Phone number already registered: {0}")]
    DuplicatePrincipal(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    /// Bad credentials or token; never says which.
    #[error("Invalid credentials")]
    Unauthorized,

    #[error("Missing or invalid access key")]
    Forbidden,

    #[error("Invalid time-to-live: {0} seconds")]
    InvalidTtl(i64),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("No pending message")]
    NotFound,

    #[error("Message could not be decrypted")]
    DecryptionFailure,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            RelayError::DuplicatePrincipal(_) => (StatusCode::CONFLICT, "DUPLICATE_PRINCIPAL"),
            RelayError::InvalidPhoneNumber(_) => (StatusCode::BAD_REQUEST, "INVALID_PHONE_NUMBER"),
            RelayError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            RelayError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            RelayError::InvalidTtl(_) => (StatusCode::BAD_REQUEST, "INVALID_TTL"),
            RelayError::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            RelayError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            RelayError::DecryptionFailure => {
                (StatusCode::UNPROCESSABLE_ENTITY, "DECRYPTION_FAILURE")
            }
            RelayError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            RelayError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            RelayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        // Server-side details stay in the logs
        let message = if status.is_server_error() {
            error!(code, "Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidTtl(ttl) => RelayError::InvalidTtl(ttl),
            StoreError::PayloadTooLarge { size, max } => RelayError::PayloadTooLarge { size, max },
            StoreError::Decryption(_) => RelayError::DecryptionFailure,
            StoreError::Vault(e) => e.into(),
            StoreError::Timeout => RelayError::Storage("store operation timed out".into()),
            StoreError::Serialization(e) => RelayError::Storage(e.to_string()),
        }
    }
}

impl From<AuthError> for RelayError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::DuplicatePrincipal(p) => RelayError::DuplicatePrincipal(p),
            AuthError::InvalidPrincipal(p) => RelayError::InvalidPhoneNumber(p),
            AuthError::InvalidToken => RelayError::Unauthorized,
            AuthError::Vault(e) => e.into(),
            AuthError::Serialization(e) => RelayError::Storage(e.to_string()),
            AuthError::Hashing(msg) | AuthError::Config(msg) => RelayError::Internal(msg),
        }
    }
}

impl From<VaultError> for RelayError {
    fn from(e: VaultError) -> Self {
        RelayError::Storage(e.to_string())
    }
}
