//! API request and response types.

use chrono::{DateTime, Utc};
use message_store::SweepReport;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registration and login body.
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub phone_number: String,
    pub password: String,
}

/// Response after registration.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
    pub phone_number: String,
    pub status: String,
}

/// Issued bearer token.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    /// Absent when tokens do not expire
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request to send a message.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub recipient: String,
    #[serde(alias = "encrypted_message")]
    pub payload: String,
    /// Seconds until the message self-destructs
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub message_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A delivered message. It no longer exists on the server.
#[derive(Debug, Serialize)]
pub struct ReceiveResponse {
    pub message_id: Uuid,
    pub sender: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub pending: bool,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub pending_messages: usize,
    pub identities: usize,
    pub last_sweep: Option<SweepReport>,
}
