// handlers/protected/devices.rs - /api/v1/devices
//
// Devices are addressed by their external id.

use std::collections::BTreeMap;

use axum::extract::{Extension, Json, Path, Query};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::{Device, TrashLog, Variable};
use crate::middleware::{ApiResponse, ApiResult, AuthUser, CurrentUser, DbPool};
use crate::services::device_health_service::DeviceHealth;
use crate::services::device_service::{CreateDeviceRequest, UpdateDeviceRequest};
use crate::services::device_token_service::mask_token;
use crate::services::variable_service::LatestValue;
use crate::services::{DeviceHealthService, DeviceService, VariableService};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub reason: Option<String>,
}

/// A device together with its raw API token. Only create and rotate return one.
#[derive(Debug, Serialize)]
pub struct DeviceWithToken {
    #[serde(flatten)]
    pub device: Device,
    pub api_token: String,
}

#[derive(Debug, Serialize)]
pub struct RotatedToken {
    pub device_id: String,
    pub api_token: String,
}

/// Token metadata; the raw token is never returned here
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub device_id: String,
    pub has_token: bool,
    pub masked_token: Option<String>,
    pub token_created_at: Option<DateTime<Utc>>,
    pub token_last_used_at: Option<DateTime<Utc>>,
}

impl From<&Device> for TokenInfo {
    fn from(device: &Device) -> Self {
        let token = device.api_token.as_deref().filter(|t| !t.is_empty());
        Self {
            device_id: device.external_id.clone(),
            has_token: token.is_some(),
            masked_token: token.map(mask_token),
            token_created_at: token.and(device.token_created_at),
            token_last_used_at: token.and(device.token_last_used_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TagsBody {
    pub tags: Vec<String>,
}

pub async fn list(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Device>> {
    let tag = query.tag.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let devices = DeviceService::new(pool).list(auth.organization_id, tag).await?;
    Ok(ApiResponse::success(devices))
}

pub async fn create(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateDeviceRequest>,
) -> ApiResult<DeviceWithToken> {
    let (device, api_token) = DeviceService::new(pool).create(auth.organization_id, request).await?;
    Ok(ApiResponse::created(DeviceWithToken { device, api_token }))
}

pub async fn get(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> ApiResult<Device> {
    let device = DeviceService::new(pool).get_in_org(auth.organization_id, &device_id).await?;
    Ok(ApiResponse::success(device))
}

pub async fn update(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
    Json(request): Json<UpdateDeviceRequest>,
) -> ApiResult<Device> {
    let device = DeviceService::new(pool)
        .update(auth.organization_id, &device_id, request)
        .await?;
    Ok(ApiResponse::success(device))
}

/// Soft delete; the returned trash entry is what restore takes
pub async fn delete(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(device_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<TrashLog> {
    let entry = DeviceService::new(pool)
        .delete(auth.organization_id, &device_id, &user.username, query.reason.as_deref())
        .await?;
    Ok(ApiResponse::success(entry))
}

pub async fn rotate_token(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> ApiResult<RotatedToken> {
    let api_token = DeviceService::new(pool)
        .rotate_token(auth.organization_id, &device_id)
        .await?;
    Ok(ApiResponse::success(RotatedToken { device_id, api_token }))
}

pub async fn token_info(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> ApiResult<TokenInfo> {
    let device = DeviceService::new(pool).get_in_org(auth.organization_id, &device_id).await?;
    Ok(ApiResponse::success(TokenInfo::from(&device)))
}

pub async fn revoke_token(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> ApiResult<TokenInfo> {
    let device = DeviceService::new(pool)
        .revoke_token(auth.organization_id, &device_id)
        .await?;
    Ok(ApiResponse::success(TokenInfo::from(&device)))
}

pub async fn tags(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> ApiResult<Vec<String>> {
    let service = DeviceService::new(pool);
    let device = service.get_in_org(auth.organization_id, &device_id).await?;
    Ok(ApiResponse::success(service.tags(device.id).await?))
}

pub async fn set_tags(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
    Json(body): Json<TagsBody>,
) -> ApiResult<Vec<String>> {
    let service = DeviceService::new(pool);
    let device = service.get_in_org(auth.organization_id, &device_id).await?;
    Ok(ApiResponse::success(service.set_tags(device.id, &body.tags).await?))
}

pub async fn health(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> ApiResult<DeviceHealth> {
    let health = DeviceHealthService::new(pool)
        .device_health(auth.organization_id, &device_id)
        .await?;
    Ok(ApiResponse::success(health))
}

pub async fn variables(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> ApiResult<Vec<Variable>> {
    let device = DeviceService::new(pool.clone())
        .get_in_org(auth.organization_id, &device_id)
        .await?;
    let variables = VariableService::new(pool).list(auth.organization_id, Some(device.id)).await?;
    Ok(ApiResponse::success(variables))
}

/// Latest value of every variable the device reports
pub async fn latest_values(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> ApiResult<BTreeMap<String, LatestValue>> {
    let device = DeviceService::new(pool.clone())
        .get_in_org(auth.organization_id, &device_id)
        .await?;
    let values = VariableService::new(pool).latest_values(device.id).await?;
    Ok(ApiResponse::success(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::device;
    use crate::types::DeviceStatus;

    #[test]
    fn token_info_masks_the_token() {
        let mut d = device("press-01", DeviceStatus::Online, None);
        d.api_token = Some("123e4567-e89b-42d3-a456-426614174000".into());
        d.token_created_at = Some(Utc::now());

        let info = TokenInfo::from(&d);
        assert!(info.has_token);
        assert_eq!(info.masked_token.as_deref(), Some("123e4567...4000"));
        assert!(info.token_created_at.is_some());
        assert_eq!(info.device_id, "press-01");
    }

    #[test]
    fn revoked_device_reports_no_token() {
        let mut d = device("press-01", DeviceStatus::Online, None);
        d.token_created_at = Some(Utc::now());

        let info = serde_json::to_value(TokenInfo::from(&d)).unwrap();
        assert_eq!(info["hasToken"], false);
        assert!(info["maskedToken"].is_null());
        assert!(info["tokenCreatedAt"].is_null());
    }
}
