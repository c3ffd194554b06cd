//! HTTP Entry Point Tests
//!
//! Exercises the router in-process: request validation, readiness and the
//! status mapping for pass outcomes.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use common::*;
use mailscribe::core::MemoryCheckpointStore;
use mailscribe::domain::Cursor;
use mailscribe::server::{router, DEFAULT_MAX_BODY_BYTES};

const WAV: &[u8] = b"RIFF-voicemail";

async fn harness(temp: &TempDir, ready: bool) -> (Harness, Router) {
    let mailbox = FakeMailbox::new()
        .page(&["m1"], 120)
        .message("m1", ALLOWED_SENDER, "Missed call from 07123456789", &[("v.wav", WAV)]);
    let h = Harness::new(
        mailbox,
        FakeTranscriber::returning("transcript"),
        MemoryCheckpointStore::with_cursor(Cursor::new(100)),
        temp.path(),
    );
    if ready {
        h.context.initialize().await.unwrap();
    }
    let app = router(h.context.clone(), DEFAULT_MAX_BODY_BYTES, "test-build");
    (h, app)
}

fn notify_request(content_type: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/notify")
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_valid_notification_runs_pass() {
    let temp = TempDir::new().unwrap();
    let (h, app) = harness(&temp, true).await;

    let response = app
        .oneshot(notify_request("application/json", envelope(MAILBOX, 130)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    assert_eq!(response.headers()["x-request-id"].len(), 8);

    assert_eq!(h.transcriber.calls().len(), 1);
    assert_eq!(h.stored_cursor().await, Some(Cursor::new(120)));
}

#[tokio::test]
async fn test_invalid_base64_is_rejected_without_pass() {
    let temp = TempDir::new().unwrap();
    let (h, app) = harness(&temp, true).await;

    let body = serde_json::json!({"message": {"data": "%%% not base64 %%%"}})
        .to_string()
        .into_bytes();
    let response = app
        .oneshot(notify_request("application/json", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.mailbox.history_calls().is_empty());
    assert!(h.transcriber.calls().is_empty());
}

#[tokio::test]
async fn test_bad_requests() {
    let temp = TempDir::new().unwrap();
    let (h, app) = harness(&temp, true).await;

    let cases = [
        ("text/plain", envelope(MAILBOX, 1)),
        ("application/json", Vec::new()),
        ("application/json", b"{not json".to_vec()),
        ("application/json; charset=utf-8", b"{\"message\":{}}".to_vec()),
    ];
    for (content_type, body) in cases {
        let response = app
            .clone()
            .oneshot(notify_request(content_type, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", content_type);
    }
    assert!(h.mailbox.history_calls().is_empty());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let temp = TempDir::new().unwrap();
    let (h, _) = harness(&temp, true).await;
    let app = router(h.context.clone(), 64, "test-build");

    let response = app
        .oneshot(notify_request("application/json", vec![b' '; 1024]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.mailbox.history_calls().is_empty());
}

#[tokio::test]
async fn test_not_ready_returns_unavailable() {
    let temp = TempDir::new().unwrap();
    let (h, app) = harness(&temp, false).await;

    let response = app
        .clone()
        .oneshot(notify_request("application/json", envelope(MAILBOX, 130)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(health["status"], "initializing");
    assert!(health["time"].is_string());

    assert!(h.mailbox.history_calls().is_empty());
}

#[tokio::test]
async fn test_expired_cursor_maps_to_server_error() {
    let temp = TempDir::new().unwrap();
    let h = Harness::new(
        FakeMailbox::new().with_tip(900).expire_before(50),
        FakeTranscriber::returning("unused"),
        MemoryCheckpointStore::with_cursor(Cursor::new(10)),
        temp.path(),
    );
    h.context.initialize().await.unwrap();
    let app = router(h.context.clone(), DEFAULT_MAX_BODY_BYTES, "test-build");

    let response = app
        .oneshot(notify_request("application/json", envelope(MAILBOX, 1000)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_other_mailbox_is_acknowledged() {
    let temp = TempDir::new().unwrap();
    let (h, app) = harness(&temp, true).await;

    let response = app
        .oneshot(notify_request(
            "application/json",
            envelope("someone@else.example", 130),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.mailbox.history_calls().is_empty());
}

#[tokio::test]
async fn test_manual_trigger() {
    let temp = TempDir::new().unwrap();
    let (h, app) = harness(&temp, true).await;

    let response = app
        .clone()
        .oneshot(Request::get("/history").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("1 transcribed"));

    // Running it again is harmless
    let response = app
        .oneshot(
            Request::post("/history")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.transcriber.calls().len(), 1);
    assert_eq!(h.stored_cursor().await, Some(Cursor::new(120)));
}

#[tokio::test]
async fn test_wrong_method_on_notify() {
    let temp = TempDir::new().unwrap();
    let (_h, app) = harness(&temp, true).await;

    let response = app
        .oneshot(Request::get("/notify").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_debug_echoes_request_without_credentials() {
    let temp = TempDir::new().unwrap();
    let (_h, app) = harness(&temp, true).await;

    let response = app
        .oneshot(
            Request::get("/debug?verbose=1")
                .header(header::AUTHORIZATION, "Bearer secret-token")
                .header("x-trace", "abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    let body = body_string(response).await;
    assert!(!body.contains("secret-token"));

    let debug: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(debug["id"], request_id.as_str());
    assert_eq!(debug["ready"], true);
    assert_eq!(debug["build_version"], "test-build");
    assert!(debug["timestamp"].is_string());
    assert_eq!(debug["request"]["method"], "GET");
    assert_eq!(debug["request"]["uri"], "/debug?verbose=1");
    assert_eq!(debug["request"]["headers"]["x-trace"][0], "abc");
    assert_eq!(debug["request"]["headers"]["authorization"][0], "[redacted]");
}
