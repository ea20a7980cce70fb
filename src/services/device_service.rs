use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::device_token_service::{token_prefix, DeviceTokenService};
use super::{EventDraft, EventService, ServiceError, ServiceResult, TrashService};
use crate::database::models::{Device, TrashLog};
use crate::types::{EventSeverity, EventType};

const MAX_EXTERNAL_ID_LEN: usize = 64;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceRequest {
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub active: Option<bool>,
    pub location: Option<String>,
    pub sensor_type: Option<String>,
    pub firmware_version: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
    pub location: Option<String>,
    pub sensor_type: Option<String>,
    pub firmware_version: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub tags: Option<Vec<String>>,
}

pub fn validate_external_id(external_id: &str) -> ServiceResult<()> {
    if external_id.trim().is_empty() {
        return Err(ServiceError::bad_request("Device ID is required"));
    }
    if external_id.len() > MAX_EXTERNAL_ID_LEN {
        return Err(ServiceError::bad_request(format!(
            "Device ID must be at most {} characters",
            MAX_EXTERNAL_ID_LEN
        )));
    }
    Ok(())
}

/// Trimmed, non-empty, unique tags in sorted order
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

pub struct DeviceService {
    pool: PgPool,
}

impl DeviceService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn events(&self) -> EventService {
        EventService::new(self.pool.clone())
    }

    /// Live device with this external id, in any organization
    pub async fn find_by_external_id(&self, external_id: &str) -> ServiceResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE external_id = $1 AND deleted_at IS NULL",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    /// Device owned by the organization. A device of another organization is a 403.
    pub async fn get_in_org(&self, organization_id: Uuid, external_id: &str) -> ServiceResult<Device> {
        let device = self
            .find_by_external_id(external_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Device not found: {}", external_id)))?;

        if device.organization_id != organization_id {
            return Err(ServiceError::access_denied(format!("Access denied to device: {}", external_id)));
        }
        Ok(device)
    }

    pub async fn list(&self, organization_id: Uuid, tag: Option<&str>) -> ServiceResult<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(
            r#"
            SELECT d.* FROM devices d
            WHERE d.organization_id = $1 AND d.deleted_at IS NULL
              AND ($2::text IS NULL OR EXISTS (
                  SELECT 1 FROM device_tags t WHERE t.device_id = d.id AND t.tag = $2))
            ORDER BY d.external_id
            "#,
        )
        .bind(organization_id)
        .bind(tag.filter(|t| !t.trim().is_empty()))
        .fetch_all(&self.pool)
        .await?;
        Ok(devices)
    }

    /// Create a device with a fresh API token. Returns the device and the raw token.
    pub async fn create(&self, organization_id: Uuid, request: CreateDeviceRequest) -> ServiceResult<(Device, String)> {
        let external_id = request.external_id.trim().to_string();
        validate_external_id(&external_id)?;
        if request.name.trim().is_empty() {
            return Err(ServiceError::bad_request("Device name is required"));
        }

        let device = sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices
                (organization_id, external_id, name, description, active, location, sensor_type,
                 firmware_version, latitude, longitude, altitude, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'UNKNOWN')
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(&external_id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(request.active.unwrap_or(true))
        .bind(&request.location)
        .bind(&request.sensor_type)
        .bind(&request.firmware_version)
        .bind(request.latitude)
        .bind(request.longitude)
        .bind(request.altitude)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServiceError::on_unique_violation(e, format!("Device already exists: {}", external_id)))?;

        if let Some(tags) = &request.tags {
            self.set_tags(device.id, tags).await?;
        }

        let (device, token) = DeviceTokenService::new(self.pool.clone()).assign_token(device.id).await?;
        self.emit_lifecycle(&device, EventType::DeviceCreated).await;

        tracing::info!(
            "Device created: {} (token: {}...)",
            device.external_id,
            token_prefix(&token)
        );
        Ok((device, token))
    }

    pub async fn update(
        &self,
        organization_id: Uuid,
        external_id: &str,
        request: UpdateDeviceRequest,
    ) -> ServiceResult<Device> {
        let device = self.get_in_org(organization_id, external_id).await?;

        let updated = sqlx::query_as::<_, Device>(
            r#"
            UPDATE devices SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                active = COALESCE($4, active),
                location = COALESCE($5, location),
                sensor_type = COALESCE($6, sensor_type),
                firmware_version = COALESCE($7, firmware_version),
                latitude = COALESCE($8, latitude),
                longitude = COALESCE($9, longitude),
                altitude = COALESCE($10, altitude),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(device.id)
        .bind(request.name.as_deref().map(str::trim).filter(|n| !n.is_empty()))
        .bind(&request.description)
        .bind(request.active)
        .bind(&request.location)
        .bind(&request.sensor_type)
        .bind(&request.firmware_version)
        .bind(request.latitude)
        .bind(request.longitude)
        .bind(request.altitude)
        .fetch_one(&self.pool)
        .await?;

        if let Some(tags) = &request.tags {
            self.set_tags(updated.id, tags).await?;
        }

        self.emit_lifecycle(&updated, EventType::DeviceUpdated).await;
        Ok(updated)
    }

    pub async fn delete(
        &self,
        organization_id: Uuid,
        external_id: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> ServiceResult<TrashLog> {
        let device = self.get_in_org(organization_id, external_id).await?;
        let entry = TrashService::new(self.pool.clone())
            .soft_delete_device(device.id, actor, reason)
            .await?;
        self.emit_lifecycle(&device, EventType::DeviceDeleted).await;
        Ok(entry)
    }

    /// New API token for a device of the organization. The raw token is only returned here.
    pub async fn rotate_token(&self, organization_id: Uuid, external_id: &str) -> ServiceResult<String> {
        let device = self.get_in_org(organization_id, external_id).await?;
        let (device, token) = DeviceTokenService::new(self.pool.clone()).rotate_token(&device).await?;
        self.emit_token_event(&device, "Device API Token Rotated", "rotated").await;
        Ok(token)
    }

    /// Clear the device's token; token ingestion stops working until a new one is assigned
    pub async fn revoke_token(&self, organization_id: Uuid, external_id: &str) -> ServiceResult<Device> {
        let device = self.get_in_org(organization_id, external_id).await?;
        let device = DeviceTokenService::new(self.pool.clone()).revoke_token(&device).await?;
        self.emit_token_event(&device, "Device API Token Revoked", "revoked").await;
        Ok(device)
    }

    async fn emit_token_event(&self, device: &Device, title: &str, verb: &str) {
        self.events()
            .emit_quietly(
                EventDraft::new(device.organization_id, EventType::DeviceUpdated, EventSeverity::Info, title)
                    .entity("DEVICE", device.id)
                    .device(&device.external_id)
                    .description(format!(
                        "API token {} for device {} ({})",
                        verb, device.name, device.external_id
                    )),
            )
            .await;
    }

    /// Existing device by external id, or a new one in `organization_id`
    pub async fn get_or_create(&self, external_id: &str, organization_id: Uuid) -> ServiceResult<Device> {
        if let Some(device) = self.find_by_external_id(external_id).await? {
            return Ok(device);
        }
        validate_external_id(external_id)?;

        let inserted = sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices (organization_id, external_id, name, active, status)
            VALUES ($1, $2, $2, TRUE, 'UNKNOWN')
            ON CONFLICT (external_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(device) = inserted else {
            // Another ingest created it first
            return self
                .find_by_external_id(external_id)
                .await?
                .ok_or_else(|| ServiceError::conflict(format!("Device already exists: {}", external_id)));
        };

        let (device, _token) = DeviceTokenService::new(self.pool.clone()).assign_token(device.id).await?;
        tracing::info!("Auto-provisioned device {} in organization {}", external_id, organization_id);
        self.emit_lifecycle(&device, EventType::DeviceCreated).await;
        Ok(device)
    }

    pub async fn tags(&self, device_id: Uuid) -> ServiceResult<Vec<String>> {
        let tags: Vec<String> = sqlx::query_scalar("SELECT tag FROM device_tags WHERE device_id = $1 ORDER BY tag")
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    /// Replace the device's tag set
    pub async fn set_tags(&self, device_id: Uuid, tags: &[String]) -> ServiceResult<Vec<String>> {
        let tags = normalize_tags(tags);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM device_tags WHERE device_id = $1")
            .bind(device_id)
            .execute(&mut *tx)
            .await?;
        for tag in &tags {
            sqlx::query("INSERT INTO device_tags (device_id, tag) VALUES ($1, $2)")
                .bind(device_id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(tags)
    }

    async fn emit_lifecycle(&self, device: &Device, event_type: EventType) {
        let verb = match event_type {
            EventType::DeviceCreated => "created",
            EventType::DeviceDeleted => "deleted",
            _ => "updated",
        };
        self.events()
            .emit_quietly(
                EventDraft::new(
                    device.organization_id,
                    event_type,
                    EventSeverity::Info,
                    format!("Device {}: {}", verb, device.name),
                )
                .entity("DEVICE", device.id)
                .device(&device.external_id),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_id_rules() {
        assert!(validate_external_id("sensor-001").is_ok());
        assert_eq!(
            validate_external_id("  ").unwrap_err().to_string(),
            "Device ID is required"
        );
        assert!(validate_external_id(&"x".repeat(65)).is_err());
        assert!(validate_external_id(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        let tags = vec![" roof".to_string(), "hvac".into(), "roof".into(), "".into()];
        assert_eq!(normalize_tags(&tags), vec!["hvac".to_string(), "roof".to_string()]);
    }
}
