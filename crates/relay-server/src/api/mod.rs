//! HTTP API for the relay.

mod handlers;
mod middleware;
mod types;

pub use handlers::ACCESS_KEY_HEADER;
pub use middleware::{logging_middleware, rate_limit_middleware, RateLimitState, REQUEST_ID_HEADER};
pub use types::*;

use crate::relay::Relay;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use message_store::ExpirySweeper;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Identity, token and message operations
    pub relay: Arc<Relay>,
    /// Expiry sweeper, for health reporting
    pub sweeper: Arc<ExpirySweeper>,
}

impl AppState {
    /// Create new application state.
    pub fn new(relay: Arc<Relay>, sweeper: Arc<ExpirySweeper>) -> Self {
        Self { relay, sweeper }
    }
}

/// Create the API router with default rate limiting.
pub fn create_router(state: AppState) -> Router {
    create_router_with_rate_limit(state, RateLimitState::new(600))
}

/// Create the API router with custom rate limiting.
pub fn create_router_with_rate_limit(state: AppState, rate_limit: RateLimitState) -> Router {
    let limited = Router::new()
        .route("/v1/register", post(handlers::register))
        .route("/v1/token", post(handlers::token))
        .route("/v1/messages", post(handlers::send_message))
        .route("/v1/messages/receive", post(handlers::receive_message))
        .route("/v1/messages/status", get(handlers::message_status))
        .layer(axum_middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ));

    Router::new()
        // Health check (no rate limiting)
        .route("/health", get(handlers::health))
        .merge(limited)
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
