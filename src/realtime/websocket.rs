use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use super::TelemetryHub;
use crate::auth::decode_jwt;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Normal closure and going-away are expected ends of a session
pub fn is_clean_close(code: u16) -> bool {
    matches!(code, 1000 | 1001)
}

/// GET /ws/telemetry?token=<jwt>
///
/// The token is checked before the upgrade so a bad one gets a plain 401.
pub async fn telemetry_ws(
    State(hub): State<Arc<TelemetryHub>>,
    Query(query): Query<WsQuery>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let token = match query.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => token.to_string(),
        _ => return ApiError::unauthorized("Missing token").into_response(),
    };

    let claims = match decode_jwt(&token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("Rejected WebSocket connection: {}", e);
            return ApiError::unauthorized("Invalid token").into_response();
        }
    };

    let Some(upgrade) = upgrade else {
        return ApiError::bad_request("WebSocket upgrade required").into_response();
    };

    let organization_id = claims.org;
    upgrade.on_upgrade(move |socket| run_session(socket, hub, organization_id))
}

async fn run_session(socket: WebSocket, hub: Arc<TelemetryHub>, organization_id: Uuid) {
    let (session_id, mut outbound) = hub.register(organization_id);
    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Close(close)) => {
                    log_close(session_id, close.as_ref());
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("WebSocket session {} transport error: {}", session_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    hub.unregister(session_id);
    tracing::info!(
        "WebSocket session {} closed ({} still connected)",
        session_id,
        hub.connected_sessions()
    );
}

fn log_close(session_id: Uuid, close: Option<&CloseFrame<'static>>) {
    match close {
        Some(frame) if !is_clean_close(frame.code) => {
            tracing::warn!(
                "WebSocket session {} closed with code {}: {}",
                session_id,
                frame.code,
                frame.reason
            );
        }
        Some(frame) => tracing::info!("WebSocket session {} closed normally ({})", session_id, frame.code),
        None => tracing::info!("WebSocket session {} closed", session_id),
    }
}
