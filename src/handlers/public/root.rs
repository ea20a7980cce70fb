// handlers/public/root.rs - GET / and GET /health

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::{json, Value};

use crate::database::manager::DatabaseManager;
use crate::realtime::TelemetryHub;

pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "IndCloud API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Multi-tenant industrial IoT backend",
            "endpoints": {
                "health": "/health (public)",
                "ingest": "/api/v1/ingest/:deviceId (X-API-Key)",
                "device_ingest": "/api/v1/data/ingest/:deviceId (X-Device-Token or JWT)",
                "websocket": "/ws/telemetry?token=<jwt>",
                "data": "/api/v1/data/* (protected)",
                "devices": "/api/v1/devices[/:deviceId] (protected)",
                "variables": "/api/v1/variables[/:id] (protected)",
                "synthetic_variables": "/api/v1/synthetic-variables[/:id] (protected)",
                "rules": "/api/v1/rules[/:id] (protected)",
                "alerts": "/api/v1/alerts (protected)",
                "global_rules": "/api/v1/global-rules[/:id] (protected)",
                "events": "/api/v1/events (protected)",
                "expression_functions": "/api/v1/expression-functions (protected)",
                "admin": "/api/v1/admin/* (ROLE_ADMIN)",
            }
        }
    }))
}

/// Database reachability plus the number of live sockets. 503 when the
/// database cannot be reached.
pub async fn health(State(hub): State<Arc<TelemetryHub>>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let sessions = hub.connected_sessions();

    match DatabaseManager::health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok",
                    "websocketSessions": sessions,
                }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "database_error": e.to_string(),
                        "websocketSessions": sessions,
                    }
                })),
            )
        }
    }
}
