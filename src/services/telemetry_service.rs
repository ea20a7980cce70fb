use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    DeviceService, EventDraft, EventService, OrganizationService, RuleEngine, ServiceError, ServiceResult,
    SyntheticVariableService, VariableService,
};
use crate::config::config;
use crate::database::models::{Device, TelemetryRecord};
use crate::realtime::TelemetryHub;
use crate::types::{DeviceStatus, EventSeverity, EventType};

const MAX_QUERY_ROWS: i64 = 10_000;

/// One batch of readings from a device
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub device_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variables: BTreeMap<String, f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TelemetryPayload {
    pub fn new(device_id: impl Into<String>, variables: BTreeMap<String, f64>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: None,
            variables,
            metadata: Map::new(),
        }
    }
}

/// Device attributes a payload's metadata may carry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceMetadata {
    pub location: Option<String>,
    pub sensor_type: Option<String>,
    pub firmware_version: Option<String>,
}

impl DeviceMetadata {
    pub fn from_map(metadata: &Map<String, Value>) -> Self {
        let text = |keys: &[&str]| {
            keys.iter().find_map(|key| match metadata.get(*key) {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        };
        Self {
            location: text(&["location"]),
            sensor_type: text(&["sensor_type", "sensorType"]),
            firmware_version: text(&["firmware_version", "firmwareVersion"]),
        }
    }
}

/// Live telemetry frame pushed to the device's organization
pub fn telemetry_message(external_id: &str, timestamp: DateTime<Utc>, variables: &BTreeMap<String, f64>) -> Value {
    json!({
        "type": "DYNAMIC_TELEMETRY",
        "deviceId": external_id,
        "timestamp": timestamp,
        "variables": variables,
    })
}

pub struct TelemetryService {
    pool: PgPool,
    hub: Arc<TelemetryHub>,
}

impl TelemetryService {
    pub fn new(pool: PgPool, hub: Arc<TelemetryHub>) -> Self {
        Self { pool, hub }
    }

    /// Persist a payload and fan it out to rules, synthetic variables and live sessions.
    ///
    /// `auth_org` is the organization of the authenticated caller, used when the
    /// device has to be provisioned on the fly.
    pub async fn ingest(&self, payload: TelemetryPayload, auth_org: Option<Uuid>) -> ServiceResult<TelemetryRecord> {
        let timestamp = payload.timestamp.unwrap_or_else(Utc::now);
        let device = self.resolve_device(&payload.device_id, auth_org).await?;
        let device = self.mark_seen(device, &payload.metadata, timestamp).await?;

        let record = sqlx::query_as::<_, TelemetryRecord>(
            r#"
            INSERT INTO telemetry_records (organization_id, device_id, timestamp, variables, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(device.organization_id)
        .bind(device.id)
        .bind(timestamp)
        .bind(json!(payload.variables))
        .bind((!payload.metadata.is_empty()).then(|| Value::Object(payload.metadata.clone())))
        .fetch_one(&self.pool)
        .await?;

        VariableService::new(self.pool.clone())
            .process_telemetry(&device, &payload.variables, timestamp, Some(record.id))
            .await?;

        self.hub.broadcast_to_org(
            device.organization_id,
            &telemetry_message(&device.external_id, timestamp, &payload.variables),
        );

        if let Err(e) = RuleEngine::new(self.pool.clone(), self.hub.clone())
            .evaluate(&device, &payload.variables)
            .await
        {
            tracing::error!("Rule evaluation failed for device {}: {}", device.external_id, e);
        }

        if let Err(e) = SyntheticVariableService::new(self.pool.clone())
            .calculate(&device, &record)
            .await
        {
            tracing::error!("Synthetic variables failed for device {}: {}", device.external_id, e);
        }

        tracing::debug!(
            "Ingested {} variables for device {}",
            payload.variables.len(),
            device.external_id
        );
        Ok(record)
    }

    async fn resolve_device(&self, external_id: &str, auth_org: Option<Uuid>) -> ServiceResult<Device> {
        let devices = DeviceService::new(self.pool.clone());
        if let Some(device) = devices.find_by_external_id(external_id).await? {
            return Ok(device);
        }

        let settings = &config().telemetry;
        if !settings.auto_provision {
            return Err(ServiceError::not_found(format!(
                "Device not found and auto-provisioning is disabled: {}",
                external_id
            )));
        }

        let organization_id = match auth_org {
            Some(org) => org,
            None => {
                OrganizationService::new(self.pool.clone())
                    .get_or_create_default(&settings.default_organization)
                    .await?
                    .id
            }
        };
        devices.get_or_create(external_id, organization_id).await
    }

    /// Apply payload metadata and flip the device ONLINE
    async fn mark_seen(&self, device: Device, metadata: &Map<String, Value>, timestamp: DateTime<Utc>) -> ServiceResult<Device> {
        let meta = DeviceMetadata::from_map(metadata);
        let was_connected = device.status == DeviceStatus::Online;

        let updated = sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices SET
                location = COALESCE($2, location),
                sensor_type = COALESCE($3, sensor_type),
                firmware_version = COALESCE($4, firmware_version),
                status = 'ONLINE',
                last_seen_at = $5,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(device.id)
        .bind(&meta.location)
        .bind(&meta.sensor_type)
        .bind(&meta.firmware_version)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await?;

        if !was_connected {
            EventService::new(self.pool.clone())
                .emit_quietly(
                    EventDraft::new(
                        updated.organization_id,
                        EventType::DeviceConnected,
                        EventSeverity::Info,
                        format!("Device connected: {}", updated.name),
                    )
                    .entity("DEVICE", updated.id)
                    .device(&updated.external_id),
                )
                .await;
        }
        Ok(updated)
    }

    /// Records of one device within `[from, to]`, oldest first
    pub async fn query(
        &self,
        organization_id: Uuid,
        external_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ServiceResult<Vec<TelemetryRecord>> {
        if from > to {
            return Err(ServiceError::bad_request("'from' must be before 'to'"));
        }
        let device = DeviceService::new(self.pool.clone())
            .get_in_org(organization_id, external_id)
            .await?;

        let records = sqlx::query_as::<_, TelemetryRecord>(
            r#"
            SELECT * FROM telemetry_records
            WHERE device_id = $1 AND timestamp BETWEEN $2 AND $3
            ORDER BY timestamp
            LIMIT $4
            "#,
        )
        .bind(device.id)
        .bind(from)
        .bind(to)
        .bind(MAX_QUERY_ROWS)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn latest_for(&self, organization_id: Uuid, external_id: &str) -> ServiceResult<Option<TelemetryRecord>> {
        let device = DeviceService::new(self.pool.clone())
            .get_in_org(organization_id, external_id)
            .await?;
        let record = sqlx::query_as::<_, TelemetryRecord>(
            "SELECT * FROM telemetry_records WHERE device_id = $1 ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(device.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Latest record of each listed device; devices of other organizations are left out
    pub async fn latest(&self, organization_id: Uuid, external_ids: &[String]) -> ServiceResult<Vec<TelemetryRecord>> {
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, TelemetryRecord>(
            r#"
            SELECT DISTINCT ON (t.device_id) t.*
            FROM telemetry_records t
            JOIN devices d ON d.id = t.device_id
            WHERE d.organization_id = $1 AND d.external_id = ANY($2) AND d.deleted_at IS NULL
            ORDER BY t.device_id, t.timestamp DESC
            "#,
        )
        .bind(organization_id)
        .bind(external_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_accepts_both_key_styles() {
        let meta: Map<String, Value> = serde_json::from_value(json!({
            "location": "Roof",
            "sensorType": "thermo",
            "firmware_version": 2.1,
            "ignored": "x"
        }))
        .unwrap();
        assert_eq!(
            DeviceMetadata::from_map(&meta),
            DeviceMetadata {
                location: Some("Roof".into()),
                sensor_type: Some("thermo".into()),
                firmware_version: Some("2.1".into()),
            }
        );
    }

    #[test]
    fn blank_metadata_is_ignored() {
        let meta: Map<String, Value> = serde_json::from_value(json!({"location": "  ", "sensor_type": null})).unwrap();
        assert_eq!(DeviceMetadata::from_map(&meta), DeviceMetadata::default());
    }

    #[test]
    fn telemetry_frame_shape() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let vars: BTreeMap<String, f64> = [("voltage".to_string(), 231.0)].into_iter().collect();
        let frame = telemetry_message("meter-7", ts, &vars);
        assert_eq!(frame["type"], "DYNAMIC_TELEMETRY");
        assert_eq!(frame["deviceId"], "meter-7");
        assert_eq!(frame["variables"]["voltage"], 231.0);
        assert_eq!(frame["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn payload_deserializes_camel_case() {
        let payload: TelemetryPayload = serde_json::from_value(json!({
            "deviceId": "d-1",
            "variables": {"temperature": 21.5}
        }))
        .unwrap();
        assert_eq!(payload.device_id, "d-1");
        assert!(payload.timestamp.is_none());
        assert!(payload.metadata.is_empty());
    }
}
