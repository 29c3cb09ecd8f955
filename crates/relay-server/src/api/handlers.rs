//! HTTP request handlers.

use super::types::{
    CredentialsRequest, HealthResponse, ReceiveResponse, RegisterResponse, SendRequest,
    SendResponse, StatusResponse, TokenResponse,
};
use super::AppState;
use crate::error::RelayError;
use crate::relay::Credentials;
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    Json,
};
use tracing::error;

/// Header carrying the service access key.
pub const ACCESS_KEY_HEADER: &str = "x-api-key";

/// Pull the access key and bearer token out of the request headers.
fn credentials(headers: &HeaderMap) -> Credentials<'_> {
    let access_key = headers
        .get(ACCESS_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    let bearer_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim);

    Credentials {
        access_key,
        bearer_token,
    }
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        pending_messages: state.relay.messages().len().await,
        identities: state.relay.credentials().count().await,
        last_sweep: state.sweeper.last_report().await,
    })
}

/// Register a phone number with a password.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), RelayError> {
    let identity = state
        .relay
        .register(&request.phone_number, &request.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: identity.id,
            phone_number: identity.principal,
            status: "registered".to_string(),
        }),
    ))
}

/// Exchange credentials for a bearer token.
pub async fn token(
    State(state): State<AppState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<TokenResponse>, RelayError> {
    let issued = state
        .relay
        .login(&request.phone_number, &request.password)
        .await?;

    Ok(Json(TokenResponse {
        access_token: issued.token,
        token_type: "bearer".to_string(),
        expires_at: issued.expires_at,
    }))
}

/// Send a message.
pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> Result<(StatusCode, Json<SendResponse>), RelayError> {
    let receipt = state
        .relay
        .send(
            credentials(&headers),
            &request.recipient,
            request.payload.into_bytes(),
            request.expires_in,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SendResponse {
            message_id: receipt.id,
            expires_at: receipt.expires_at,
        }),
    ))
}

/// Receive, and thereby destroy, the oldest pending message.
pub async fn receive_message(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReceiveResponse>, RelayError> {
    let message = state.relay.receive(credentials(&headers)).await?;

    let payload = String::from_utf8(message.payload).map_err(|_| {
        error!(message_id = %message.id, "Delivered payload is not valid UTF-8");
        RelayError::Internal("payload is not valid UTF-8".into())
    })?;

    Ok(Json(ReceiveResponse {
        message_id: message.id,
        sender: message.sender,
        payload,
        created_at: message.created_at,
        expires_at: message.expires_at,
    }))
}

/// Check whether a message is waiting.
pub async fn message_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, RelayError> {
    let pending = state.relay.status(credentials(&headers)).await?;
    Ok(Json(StatusResponse { pending }))
}
