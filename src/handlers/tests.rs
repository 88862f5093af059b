//! # Tests for Handlers
//!
//! Router-level tests against an in-memory job store.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Json,
};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{init_pool, migrate};
use crate::handlers::root;
use crate::models::ServiceInfo;
use crate::repositories::EnqueueRequest;
use crate::server::{AppState, create_app};

const TOKEN: &str = "test-token-123";

async fn setup_test_app() -> (AppState, Router) {
    let config = AppConfig {
        profile: "test".to_string(),
        database_url: "sqlite::memory:".to_string(),
        db_max_connections: 1,
        operator_tokens: vec![TOKEN.to_string()],
        ..Default::default()
    };

    let db = init_pool(&config).await.expect("Failed to init test DB");
    migrate(&db).await.expect("Failed to migrate test DB");

    let state = AppState::new(Arc::new(config), db);
    let app = create_app(state.clone());
    (state, app)
}

fn authed(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN));

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let Json(service_info) = root().await;

    assert_eq!(service_info.service, "crawler-scheduler");
    assert_eq!(service_info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_service_info_serializes() {
    let json_value = serde_json::to_value(ServiceInfo::default()).unwrap();
    assert!(json_value.get("service").is_some());
    assert!(json_value.get("version").is_some());
}

#[tokio::test]
async fn test_root_and_healthz_are_public() {
    let (_state, app) = setup_test_app().await;

    let (status, body) = send(&app, Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "crawler-scheduler");

    let (status, body) = send(&app, Request::get("/healthz").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn test_responses_echo_request_id() {
    let (_state, app) = setup_test_app().await;

    let request = Request::get("/")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");
}

#[tokio::test]
async fn test_jobs_require_auth() {
    let (_state, app) = setup_test_app().await;

    let (status, body) = send(&app, Request::get("/jobs").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(
        &app,
        Request::get("/scheduled-jobs")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_enqueue_is_idempotent_per_subject() {
    let (_state, app) = setup_test_app().await;

    let (status, body) = send(
        &app,
        authed("POST", "/jobs", Some(json!({ "subject_id": "rust", "priority": 40 }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["enqueued"], true);
    assert_eq!(body["job"]["priority"], 40);
    assert_eq!(body["job"]["enqueued_by"], "admin");

    let (status, body) = send(
        &app,
        authed("POST", "/jobs", Some(json!({ "subject_id": "rust", "priority": 90 }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enqueued"], false);

    let (_, stats) = send(&app, authed("GET", "/jobs/stats", None)).await;
    assert_eq!(stats["queued"], 1);
    assert_eq!(stats["total"], 1);
}

#[tokio::test]
async fn test_enqueue_rejects_out_of_range_priority() {
    let (_state, app) = setup_test_app().await;

    let (status, body) = send(
        &app,
        authed("POST", "/jobs", Some(json!({ "subject_id": "rust", "priority": 101 }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert!(body["details"]["priority"].is_string());
}

#[tokio::test]
async fn test_malformed_body_is_problem_json() {
    let (_state, app) = setup_test_app().await;

    let request = Request::post("/jobs")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
}

#[tokio::test]
async fn test_list_jobs_in_claim_order_with_pagination() {
    let (state, app) = setup_test_app().await;

    for (subject, priority) in [("low", 10), ("high", 90), ("mid", 50)] {
        state
            .jobs
            .enqueue(EnqueueRequest::new(subject, "test").with_priority(priority))
            .await
            .unwrap();
    }

    let (status, body) = send(&app, authed("GET", "/jobs?limit=2", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    let subjects: Vec<&str> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|job| job["subject_id"].as_str().unwrap())
        .collect();
    assert_eq!(subjects, vec!["high", "mid"]);

    let (_, body) = send(&app, authed("GET", "/jobs?limit=2&offset=2", None)).await;
    assert_eq!(body["jobs"][0]["subject_id"], "low");

    let (status, _) = send(&app, authed("GET", "/jobs?limit=0", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, authed("GET", "/jobs?limit=101", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, authed("GET", "/jobs?status=done", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, authed("GET", "/jobs?status=queued", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn test_job_overrides() {
    let (state, app) = setup_test_app().await;
    let crate::repositories::EnqueueOutcome::Enqueued(job) = state
        .jobs
        .enqueue(EnqueueRequest::new("rust", "test").with_priority(95))
        .await
        .unwrap()
    else {
        panic!("expected a new job");
    };

    let (status, body) = send(
        &app,
        authed("POST", &format!("/jobs/{}/boost", job.id), Some(json!({ "delta": 10 }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["priority"], 100);

    let (status, body) = send(
        &app,
        authed(
            "PATCH",
            &format!("/jobs/{}", job.id),
            Some(json!({ "status": "failed", "priority": 20 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["priority"], 20);

    let (status, _) = send(
        &app,
        authed("PATCH", &format!("/jobs/{}", job.id), Some(json!({ "status": "running" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, authed("POST", &format!("/jobs/{}/retry", job.id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["retry_count"], 0);

    let (status, body) = send(&app, authed("GET", &format!("/jobs/{}", Uuid::new_v4()), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_requeue_conflicts_with_pending_subject() {
    let (state, app) = setup_test_app().await;
    let crate::repositories::EnqueueOutcome::Enqueued(first) = state
        .jobs
        .enqueue(EnqueueRequest::new("rust", "test"))
        .await
        .unwrap()
    else {
        panic!("expected a new job");
    };
    state
        .jobs
        .update_status(first.id, crate::models::JobStatus::Failed)
        .await
        .unwrap();
    state
        .jobs
        .enqueue(EnqueueRequest::new("rust", "test"))
        .await
        .unwrap();

    let (status, body) = send(&app, authed("POST", &format!("/jobs/{}/retry", first.id), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_bulk_endpoints_skip_unknown_ids() {
    let (state, app) = setup_test_app().await;
    let mut ids = Vec::new();
    for subject in ["a", "b"] {
        if let crate::repositories::EnqueueOutcome::Enqueued(job) = state
            .jobs
            .enqueue(EnqueueRequest::new(subject, "test"))
            .await
            .unwrap()
        {
            ids.push(job.id);
        }
    }
    ids.push(Uuid::new_v4());

    let (status, body) = send(
        &app,
        authed("POST", "/jobs/status", Some(json!({ "ids": ids, "status": "failed" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["affected"], 2);

    let (status, body) = send(&app, authed("POST", "/jobs/retry", Some(json!({ "ids": ids })))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["affected"], 2);

    let (status, _) = send(&app, authed("POST", "/jobs/retry", Some(json!({ "ids": [] })))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_scheduled_job_crud() {
    let (_state, app) = setup_test_app().await;

    let (status, created) = send(
        &app,
        authed(
            "POST",
            "/scheduled-jobs",
            Some(json!({
                "name": "rust-hourly",
                "subject_id": "rust",
                "cron_expression": "HOURLY",
                "priority": 30
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["cron_expression"], "@hourly");
    assert_eq!(created["enabled"], true);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        authed(
            "POST",
            "/scheduled-jobs",
            Some(json!({ "name": "rust-hourly", "subject_id": "go", "cron_expression": "@daily" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        authed(
            "POST",
            "/scheduled-jobs",
            Some(json!({ "name": "bad", "subject_id": "go", "cron_expression": "@fortnightly" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["details"]["cron_expression"].is_string());

    let (status, updated) = send(
        &app,
        authed(
            "PUT",
            &format!("/scheduled-jobs/{}", id),
            Some(json!({ "cron_expression": "@every 90m", "description": "ninety" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["cron_expression"], "@every 1h30m");
    assert_eq!(updated["description"], "ninety");

    let (status, toggled) = send(
        &app,
        authed("POST", &format!("/scheduled-jobs/{}/toggle", id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["enabled"], false);

    let (_, list) = send(&app, authed("GET", "/scheduled-jobs", None)).await;
    assert_eq!(list["scheduled_jobs"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, authed("DELETE", &format!("/scheduled-jobs/{}", id), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, authed("GET", &format!("/scheduled-jobs/{}", id), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (_state, app) = setup_test_app().await;

    let (status, body) = send(&app, Request::get("/openapi.json").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/jobs/{id}/boost"].is_object());
    assert!(body["components"]["securitySchemes"]["bearer_auth"].is_object());
}
