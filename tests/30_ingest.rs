mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};

use common::call;

fn ingest(api_key: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::post("/api/v1/ingest/boiler-1").header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn api_key_is_required() {
    let (status, body) = call(ingest(None, r#"{"temperature": 71.5}"#)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "X-API-Key header is required");
}

#[tokio::test]
async fn api_key_must_be_a_uuid() {
    let (status, body) = call(ingest(Some("letmein"), r#"{"temperature": 71.5}"#)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid API key format. Expected UUID.");
}

#[tokio::test]
async fn key_is_checked_before_the_body() {
    // A malformed body still gets the auth error first
    let (status, _) = call(ingest(Some("letmein"), "{not json")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn device_ingest_without_credentials_is_401() {
    let request = Request::post("/api/v1/data/ingest/boiler-1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"variables": {"temperature": 71.5}}"#))
        .unwrap();
    let (status, body) = call(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing Authorization header");
}

#[tokio::test]
async fn bulk_ingest_is_protected() {
    let request = Request::post("/api/v1/data/ingest/bulk")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"telemetry": []}"#))
        .unwrap();
    let (status, _) = call(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
