use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use applybox::api::auth::RateLimiter;
use applybox::api::{AppState, build_router};
use applybox::broker::{Broker, MemoryBroker};
use applybox::clients::artifacts::ArtifactStore;
use applybox::clients::fetch::PageFetcher;
use applybox::clients::llm::StaticEngine;
use applybox::clients::sms::MemorySms;
use applybox::config::Config;
use applybox::dispatcher::{Dispatcher, DispatcherSettings};
use applybox::hitl::HitlController;
use applybox::messages::QueueName;
use applybox::observability::Metrics;
use applybox::store::AppStore;

const API_KEY: &str = "test-api-key";
const WEBHOOK_SECRET: &str = "test-webhook-secret";

fn test_config() -> Config {
    let mut config = Config::default();
    config.secrets.api_key = Some(SecretString::from(API_KEY.to_string()));
    config.secrets.sms_webhook_secret = Some(SecretString::from(WEBHOOK_SECRET.to_string()));
    config
}

struct TestApp {
    router: Router,
    broker: MemoryBroker,
    _temp: TempDir,
}

/// Builds a router with isolated dependencies: temp store, memory broker,
/// deterministic engine, capturing SMS gateway
fn build_test_app() -> TestApp {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(AppStore::open(temp.path().join("store")).expect("store open"));
    let broker = MemoryBroker::new();

    let dispatcher = Arc::new(Dispatcher::new(
        store,
        Arc::new(broker.clone()),
        Arc::new(StaticEngine::new()),
        ArtifactStore::in_memory(),
        Arc::new(MemorySms::new()),
        None,
        DispatcherSettings::default(),
        Arc::new(Metrics::new()),
    ));
    let hitl = Arc::new(HitlController::new(
        dispatcher.clone(),
        PageFetcher::new(Duration::from_secs(5)).expect("fetcher"),
    ));
    let state = AppState::new(
        test_config(),
        dispatcher,
        hitl,
        RateLimiter::new(5, Duration::from_secs(60)),
    );

    TestApp {
        router: build_router(state),
        broker,
        _temp: temp,
    }
}

fn post_json(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-API-Key", API_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_authed(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("X-API-Key", API_KEY)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn profile_payload() -> Value {
    json!({
        "full_name": "Dana Smith",
        "email": "dana@example.com",
        "phone": "+15551230000",
        "headline": "Distributed systems engineer",
        "summary": "A decade of queueing things",
        "preferences": { "city": "Austin", "salary_expectation": "150k" }
    })
}

fn role_payload() -> Value {
    json!({
        "company": "Acme",
        "title": "Staff Engineer",
        "description": "Queues and forms",
        "posting_url": "https://boards.example.com/acme/staff"
    })
}

#[tokio::test]
async fn test_missing_api_key_is_forbidden() {
    let app = build_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/jobs/apply/1")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_wrong_api_key_is_forbidden() {
    let app = build_test_app();

    let request = Request::builder()
        .method("GET")
        .uri("/applications")
        .header("X-API-Key", "not-the-key!!")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_profile_ingest_upserts() {
    let app = build_test_app();

    let response = app
        .router
        .clone()
        .oneshot(post_json("/ingest/profile", profile_payload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    let first_id = body["profile_id"].as_u64().unwrap();

    // Same phone number updates in place
    let response = app
        .router
        .clone()
        .oneshot(post_json("/ingest/profile", profile_payload()))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["profile_id"].as_u64().unwrap(), first_id);
}

#[tokio::test]
async fn test_profile_ingest_requires_phone_for_new_profile() {
    let app = build_test_app();

    let response = app
        .router
        .oneshot(post_json(
            "/ingest/profile",
            json!({"headline": "x", "summary": "y"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_profile_ingest_rate_limit() {
    let app = build_test_app();

    for _ in 0..5 {
        let response = app
            .router
            .clone()
            .oneshot(post_json("/ingest/profile", profile_payload()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .router
        .oneshot(post_json("/ingest/profile", profile_payload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_apply_is_idempotent_and_publishes_once() {
    let app = build_test_app();

    app.router
        .clone()
        .oneshot(post_json("/ingest/profile", profile_payload()))
        .await
        .unwrap();
    let response = app
        .router
        .clone()
        .oneshot(post_json("/ingest/role", role_payload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let role_id = json_body(response).await["role_id"].as_u64().unwrap();

    let response = app
        .router
        .clone()
        .oneshot(post_json(&format!("/jobs/apply/{role_id}"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = json_body(response).await;
    assert_eq!(first["status"], "queued");
    assert!(first["task_id"].is_string());
    let application_id = first["application_id"].as_u64().unwrap();

    // Second trigger reuses the in-flight application
    let response = app
        .router
        .clone()
        .oneshot(post_json(&format!("/jobs/apply/{role_id}"), json!({})))
        .await
        .unwrap();
    let second = json_body(response).await;
    assert_eq!(second["application_id"].as_u64().unwrap(), application_id);
    assert_eq!(second["status"], "reused");

    // Exactly one task was published
    assert_eq!(
        app.broker.queue_depth(QueueName::JobApplication).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_apply_unknown_role_is_404() {
    let app = build_test_app();
    app.router
        .clone()
        .oneshot(post_json("/ingest/profile", profile_payload()))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(post_json("/jobs/apply/999", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_application_listing_and_filter_validation() {
    let app = build_test_app();

    app.router
        .clone()
        .oneshot(post_json("/ingest/profile", profile_payload()))
        .await
        .unwrap();
    let response = app
        .router
        .clone()
        .oneshot(post_json("/ingest/role", role_payload()))
        .await
        .unwrap();
    let role_id = json_body(response).await["role_id"].as_u64().unwrap();
    app.router
        .clone()
        .oneshot(post_json(&format!("/jobs/apply/{role_id}"), json!({})))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(get_authed("/applications?status=submitting"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let list = json_body(response).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["role_title"], "Staff Engineer");
    assert_eq!(list[0]["company_name"], "Acme");

    // Unknown enum value is rejected
    let response = app
        .router
        .oneshot(get_authed("/applications?status=procrastinating"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reports_degraded_without_worker_heartbeat() {
    let app = build_test_app();

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    // Store, broker, blob, sms are fine; no automation heartbeat yet
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = json_body(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"]["automation"], "unhealthy");
    assert_eq!(body["services"]["store"], "healthy");
}

fn signed_webhook(body: &str) -> Request<Body> {
    let signature =
        applybox::clients::sms::compute_signature(WEBHOOK_SECRET, body.as_bytes()).unwrap();
    Request::builder()
        .method("POST")
        .uri("/webhooks/sms")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("X-Applybox-Signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_webhook_rejects_unsigned_requests() {
    let app = build_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/sms")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("From=%2B15551230000&Body=status"))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let app = build_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/sms")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header("X-Applybox-Signature", "bm90IGEgcmVhbCBzaWduYXR1cmU=")
        .body(Body::from("From=%2B15551230000&Body=status"))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_routes_commands_and_replies_via_queue() {
    let app = build_test_app();
    app.router
        .clone()
        .oneshot(post_json("/ingest/profile", profile_payload()))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(signed_webhook("From=%2B15551230000&Body=status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The reply was enqueued, not sent inline
    assert_eq!(
        app.broker
            .queue_depth(QueueName::SendNotification)
            .await
            .unwrap(),
        1
    );
}
