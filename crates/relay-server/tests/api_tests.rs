//! Integration tests for the relay API.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use message_store::{ExpirySweeper, ManualClock, MessageStore, SweepConfig};
use relay_auth::{AccessKeys, CredentialStore, HashParams, TokenPolicy, TokenService};
use relay_server::{
    api::{
        create_router, create_router_with_rate_limit, AppState, RateLimitState, ACCESS_KEY_HEADER,
        REQUEST_ID_HEADER,
    },
    Relay,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_test::assert_ok;
use tower::ServiceExt;

const API_KEY: &str = "integration-test-key";

struct TestApp {
    state: AppState,
    clock: ManualClock,
}

/// Create a test app with memory-only storage and a manual clock.
fn create_test_app() -> TestApp {
    let clock = ManualClock::default();
    let params = HashParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };

    let messages = Arc::new(MessageStore::with_clock(Arc::new(clock.clone())));
    let relay = Relay::new(
        Arc::new(CredentialStore::in_memory(params).unwrap()),
        TokenService::new(SecretString::new("test-secret".into()), TokenPolicy::default()).unwrap(),
        AccessKeys::new([API_KEY]),
        messages.clone(),
    );
    let sweeper = ExpirySweeper::new(messages, SweepConfig::default());

    TestApp {
        state: AppState::new(Arc::new(relay), Arc::new(sweeper)),
        clock,
    }
}

impl TestApp {
    fn router(&self) -> Router {
        create_router_with_rate_limit(self.state.clone(), RateLimitState::permissive())
    }
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    api_key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        request = request.header(ACCESS_KEY_HEADER, key);
    }
    if let Some(token) = token {
        request = request.header("authorization", format!("Bearer {}", token));
    }

    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        assert_ok!(serde_json::from_slice(&body))
    };

    (status, json)
}

/// Register `phone` with password "pw123" and return a bearer token.
async fn register_and_login(app: &Router, phone: &str) -> String {
    let credentials = json!({ "phone_number": phone, "password": "pw123" });

    let (status, _) = call(app, "POST", "/v1/register", None, None, Some(credentials.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = call(app, "POST", "/v1/token", None, None, Some(credentials)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["token_type"], "bearer");
    json["access_token"].as_str().unwrap().to_string()
}

async fn send(app: &Router, token: &str, recipient: &str, payload: &str, ttl: i64) -> (StatusCode, Value) {
    call(
        app,
        "POST",
        "/v1/messages",
        Some(token),
        Some(API_KEY),
        Some(json!({ "recipient": recipient, "payload": payload, "expires_in": ttl })),
    )
    .await
}

async fn receive(app: &Router, token: &str) -> (StatusCode, Value) {
    call(app, "POST", "/v1/messages/receive", Some(token), Some(API_KEY), None).await
}

#[tokio::test]
async fn test_health_endpoint() {
    let test = create_test_app();
    let app = create_router(test.state.clone());

    let (status, json) = call(&app, "GET", "/health", None, None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pending_messages"], 0);
    assert_eq!(json["identities"], 0);
    assert!(json["last_sweep"].is_null());
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let test = create_test_app();
    let app = test.router();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let id = response.headers().get(REQUEST_ID_HEADER).unwrap();
    assert!(uuid::Uuid::parse_str(id.to_str().unwrap()).is_ok());
}

#[tokio::test]
async fn test_send_then_receive_exactly_once() {
    let test = create_test_app();
    let app = test.router();

    let alice = register_and_login(&app, "+15550001111").await;
    let bob = register_and_login(&app, "+15550002222").await;

    let (status, json) = send(&app, &alice, "+15550002222", "hi", 5).await;
    assert_eq!(status, StatusCode::CREATED);
    let message_id = json["message_id"].as_str().unwrap().to_string();

    let (status, json) = receive(&app, &bob).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["payload"], "hi");
    assert_eq!(json["sender"], "+15550001111");
    assert_eq!(json["message_id"], message_id.as_str());

    let (status, json) = receive(&app, &bob).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_receive_with_nothing_pending_is_not_found_twice() {
    let test = create_test_app();
    let app = test.router();
    let bob = register_and_login(&app, "+15550002222").await;

    for _ in 0..2 {
        let (status, _) = receive(&app, &bob).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_expired_message_is_swept() {
    let test = create_test_app();
    let app = test.router();

    let alice = register_and_login(&app, "+15550001111").await;
    let bob = register_and_login(&app, "+15550002222").await;

    let (status, _) = send(&app, &alice, "+15550002222", "short lived", 1).await;
    assert_eq!(status, StatusCode::CREATED);

    // Fifteen seconds pass, covering more than one sweep interval
    test.clock.advance(chrono::Duration::seconds(15));
    let report = test.state.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.removed, 1);

    let (status, _) = receive(&app, &bob).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, health) = call(&app, "GET", "/health", None, None, None).await;
    assert_eq!(health["pending_messages"], 0);
    assert_eq!(health["last_sweep"]["removed"], 1);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let test = create_test_app();
    let app = test.router();
    register_and_login(&app, "+15550001111").await;

    let (status, json) = call(
        &app,
        "POST",
        "/v1/register",
        None,
        None,
        Some(json!({ "phone_number": "+1 555 000 1111", "password": "other" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "DUPLICATE_PRINCIPAL");

    // Original credentials still work
    let (status, _) = call(
        &app,
        "POST",
        "/v1/token",
        None,
        None,
        Some(json!({ "phone_number": "+15550001111", "password": "pw123" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_phone_number() {
    let test = create_test_app();
    let app = test.router();

    let (status, json) = call(
        &app,
        "POST",
        "/v1/register",
        None,
        None,
        Some(json!({ "phone_number": "invalid", "password": "pw" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_PHONE_NUMBER");
}

#[tokio::test]
async fn test_bad_login_is_generic() {
    let test = create_test_app();
    let app = test.router();
    register_and_login(&app, "+15550001111").await;

    let (status_wrong, wrong) = call(
        &app,
        "POST",
        "/v1/token",
        None,
        None,
        Some(json!({ "phone_number": "+15550001111", "password": "nope" })),
    )
    .await;
    let (status_unknown, unknown) = call(
        &app,
        "POST",
        "/v1/token",
        None,
        None,
        Some(json!({ "phone_number": "+15559999999", "password": "pw123" })),
    )
    .await;

    assert_eq!(status_wrong, StatusCode::UNAUTHORIZED);
    assert_eq!(status_unknown, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong, unknown);
}

#[tokio::test]
async fn test_access_key_checked_before_token() {
    let test = create_test_app();
    let app = test.router();

    // No key at all, garbage token: still 403
    let (status, json) = call(&app, "GET", "/v1/messages/status", Some("garbage"), None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "FORBIDDEN");

    let (status, _) = call(&app, "GET", "/v1/messages/status", None, Some("wrong-key"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Good key, bad token
    let (status, json) =
        call(&app, "GET", "/v1/messages/status", Some("garbage"), Some(API_KEY), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "UNAUTHORIZED");

    // Good key, no token
    let (status, _) = call(&app, "GET", "/v1/messages/status", None, Some(API_KEY), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_token_without_access_key_is_forbidden() {
    let test = create_test_app();
    let app = test.router();
    let alice = register_and_login(&app, "+15550001111").await;

    let (status, _) = call(
        &app,
        "POST",
        "/v1/messages",
        Some(&alice),
        None,
        Some(json!({ "recipient": "+15550002222", "payload": "hi", "expires_in": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_status_reports_without_consuming() {
    let test = create_test_app();
    let app = test.router();

    let alice = register_and_login(&app, "+15550001111").await;
    let bob = register_and_login(&app, "+15550002222").await;

    let status_of = |token: String| {
        let app = app.clone();
        async move {
            let (status, json) =
                call(&app, "GET", "/v1/messages/status", Some(&token), Some(API_KEY), None).await;
            assert_eq!(status, StatusCode::OK);
            json["pending"].as_bool().unwrap()
        }
    };

    assert!(!status_of(bob.clone()).await);
    send(&app, &alice, "+15550002222", "hi", 60).await;
    assert!(status_of(bob.clone()).await);
    assert!(status_of(bob.clone()).await);

    let (status, _) = receive(&app, &bob).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!status_of(bob).await);
}

#[tokio::test]
async fn test_invalid_ttl_rejected() {
    let test = create_test_app();
    let app = test.router();
    let alice = register_and_login(&app, "+15550001111").await;

    for ttl in [0, -1] {
        let (status, json) = send(&app, &alice, "+15550002222", "hi", ttl).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_TTL");
    }

    let (status, json) = send(&app, &alice, "+15550002222", "hi", 8 * 24 * 60 * 60).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_TTL");
}

#[tokio::test]
async fn test_payload_too_large() {
    let test = create_test_app();
    let app = test.router();
    let alice = register_and_login(&app, "+15550001111").await;

    let payload = "x".repeat(64 * 1024 + 1);
    let (status, json) = send(&app, &alice, "+15550002222", &payload, 60).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["code"], "PAYLOAD_TOO_LARGE");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_receivers_see_one_message() {
    let test = create_test_app();
    let app = test.router();

    let alice = register_and_login(&app, "+15550001111").await;
    let bob = register_and_login(&app, "+15550002222").await;
    send(&app, &alice, "+15550002222", "race", 60).await;

    let receivers = (0..10).map(|_| {
        let app = app.clone();
        let bob = bob.clone();
        tokio::spawn(async move { receive(&app, &bob).await.0 })
    });
    let statuses: Vec<StatusCode> = futures::future::join_all(receivers)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::NOT_FOUND).count(),
        9
    );
}

#[tokio::test]
async fn test_rate_limiting() {
    let test = create_test_app();
    // Very restrictive rate limit: 1 request per minute
    let app = create_router_with_rate_limit(test.state.clone(), RateLimitState::new(1));

    let (status, _) = call(&app, "GET", "/v1/messages/status", None, Some(API_KEY), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = call(&app, "GET", "/v1/messages/status", None, Some(API_KEY), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["code"], "RATE_LIMIT_EXCEEDED");

    // Health is not rate limited
    let (status, _) = call(&app, "GET", "/health", None, None, None).await;
    assert_eq!(status, StatusCode::OK);
}
