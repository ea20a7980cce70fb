mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};

use common::{call, get, token};

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    for uri in [
        "/api/v1/devices",
        "/api/v1/devices/press-01/token",
        "/api/v1/data/latest",
        "/api/v1/rules",
        "/api/v1/global-rules",
        "/api/v1/events/recent",
        "/api/v1/expression-functions",
    ] {
        let (status, body) = call(get(uri)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        assert_eq!(body["message"], "Missing Authorization header", "{}", uri);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn admin_routes_require_a_bearer_token() {
    let (status, _) = call(get("/api/v1/admin/trash")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(get("/api/v1/admin/users")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn forged_tokens_are_rejected() {
    let request = Request::get("/api/v1/devices")
        .header(header::AUTHORIZATION, "Bearer not.a.jwt")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().starts_with("Invalid JWT token"));
}

#[tokio::test]
async fn basic_auth_is_not_accepted() {
    let request = Request::get("/api/v1/devices")
        .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Authorization header must use Bearer token format");
}

#[tokio::test]
async fn websocket_checks_the_token_before_upgrading() {
    let (status, body) = call(get("/ws/telemetry")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing token");

    let (status, body) = call(get("/ws/telemetry?token=garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid token");

    let uri = format!("/ws/telemetry?token={}", token(&["ROLE_USER"]));
    let (status, body) = call(get(&uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "WebSocket upgrade required");
}
