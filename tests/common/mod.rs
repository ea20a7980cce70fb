#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use indcloud_api::app::{router, AppState};
use indcloud_api::auth::{generate_jwt, Claims};
use indcloud_api::realtime::TelemetryHub;

static SERVER: OnceLock<TestServer> = OnceLock::new();

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        // Background work stays off so the server boots without a broker or a migrated database
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_indcloud-api"));
        cmd.env("API_PORT", port.to_string())
            .env("DATABASE_RUN_MIGRATIONS", "false")
            .env("DATABASE_CONNECTION_TIMEOUT", "2")
            .env("SCHEDULER_ENABLED", "false")
            .env("MQTT_ENABLED", "false")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;
        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(resp) = client.get(format!("{}/health", self.base_url)).send().await {
                if resp.status() == reqwest::StatusCode::OK || resp.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }
}

pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| TestServer::spawn().expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(20)).await?;
    Ok(server)
}

/// The full router, served in-process
pub fn app() -> Router {
    router(AppState::new(Arc::new(TelemetryHub::new())))
}

pub fn token(roles: &[&str]) -> String {
    let claims = Claims::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        "tester",
        roles.iter().map(|r| r.to_string()).collect(),
    );
    generate_jwt(&claims).expect("token")
}

/// Send one request through the router and decode the JSON body (Null when empty)
pub async fn call(request: Request<Body>) -> (StatusCode, Value) {
    let response = app().oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}
