use sqlx::PgPool;
use std::sync::Arc;

use super::payload::{parse_payload, MqttTelemetry};
use crate::realtime::TelemetryHub;
use crate::services::{DeviceTokenService, ServiceResult, TelemetryService};

/// Why a message was dropped without being ingested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingToken,
    UnknownToken,
    DeviceMismatch { token_device: String, claimed: String },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::MissingToken => write!(f, "missing apiToken"),
            Rejection::UnknownToken => write!(f, "unknown apiToken"),
            Rejection::DeviceMismatch { token_device, claimed } => {
                write!(f, "token belongs to {} but message claims {}", token_device, claimed)
            }
        }
    }
}

pub struct MqttMessageHandler {
    pool: PgPool,
    hub: Arc<TelemetryHub>,
    device_auth_required: bool,
}

impl MqttMessageHandler {
    pub fn new(pool: PgPool, hub: Arc<TelemetryHub>, device_auth_required: bool) -> Self {
        Self {
            pool,
            hub,
            device_auth_required,
        }
    }

    /// Handle one publish. Every failure is logged here.
    pub async fn handle(&self, topic: &str, bytes: &[u8]) {
        let message = match parse_payload(bytes) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping MQTT message on {}: {}", topic, e);
                return;
            }
        };

        let device_id = message.payload.device_id.clone();
        match self.process(message).await {
            Ok(Ok(())) => tracing::debug!("Ingested MQTT telemetry for {}", device_id),
            Ok(Err(rejection)) => tracing::warn!("Rejected MQTT telemetry for {}: {}", device_id, rejection),
            Err(e) => tracing::error!("Failed to ingest MQTT telemetry for {}: {}", device_id, e),
        }
    }

    async fn process(&self, message: MqttTelemetry) -> ServiceResult<Result<(), Rejection>> {
        let telemetry = TelemetryService::new(self.pool.clone(), self.hub.clone());

        if !self.device_auth_required {
            telemetry.ingest(message.payload, None).await?;
            return Ok(Ok(()));
        }

        let Some(token) = message.api_token else {
            return Ok(Err(Rejection::MissingToken));
        };

        let tokens = DeviceTokenService::new(self.pool.clone());
        let Some(device) = tokens.get_device_by_token(&token).await? else {
            return Ok(Err(Rejection::UnknownToken));
        };

        if device.external_id != message.payload.device_id {
            return Ok(Err(Rejection::DeviceMismatch {
                token_device: device.external_id,
                claimed: message.payload.device_id,
            }));
        }

        tokens.update_token_last_used(&token).await?;
        telemetry.ingest(message.payload, Some(device.organization_id)).await?;
        Ok(Ok(()))
    }
}
