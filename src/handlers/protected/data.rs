// handlers/protected/data.rs - /api/v1/data telemetry reads and bulk ingestion

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::models::TelemetryRecord;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser, DbPool};
use crate::realtime::TelemetryHub;
use crate::services::{DeviceService, TelemetryPayload, TelemetryService};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryQuery {
    pub device_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// GET /api/v1/data/query?deviceId&from&to
pub async fn query(
    State(hub): State<Arc<TelemetryHub>>,
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(params): Query<TelemetryQuery>,
) -> ApiResult<Vec<TelemetryRecord>> {
    let records = TelemetryService::new(pool, hub)
        .query(auth.organization_id, &params.device_id, params.from, params.to)
        .await?;
    Ok(ApiResponse::success(records))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestQuery {
    #[serde(default)]
    pub device_ids: String,
}

/// `a, b,,c` -> `[a, b, c]`
pub fn split_device_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// GET /api/v1/data/latest?deviceIds=a,b
pub async fn latest(
    State(hub): State<Arc<TelemetryHub>>,
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(params): Query<LatestQuery>,
) -> ApiResult<Vec<TelemetryRecord>> {
    let ids = split_device_ids(&params.device_ids);
    let records = TelemetryService::new(pool, hub).latest(auth.organization_id, &ids).await?;
    Ok(ApiResponse::success(records))
}

/// GET /api/v1/data/latest/:device_id
pub async fn latest_for_device(
    State(hub): State<Arc<TelemetryHub>>,
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(device_id): Path<String>,
) -> ApiResult<TelemetryRecord> {
    let record = TelemetryService::new(pool, hub)
        .latest_for(auth.organization_id, &device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No telemetry for device: {}", device_id)))?;
    Ok(ApiResponse::success(record))
}

#[derive(Debug, Deserialize)]
pub struct BulkIngestRequest {
    #[serde(default)]
    pub telemetry: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItem {
    pub device_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variables: BTreeMap<String, f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl From<BulkItem> for TelemetryPayload {
    fn from(item: BulkItem) -> Self {
        TelemetryPayload {
            device_id: item.device_id,
            timestamp: item.timestamp,
            variables: item.variables,
            metadata: item.metadata,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkIngestResult {
    pub success_count: usize,
    pub failure_count: usize,
}

impl BulkIngestResult {
    pub fn rejected(items: usize) -> Self {
        Self {
            success_count: 0,
            failure_count: items,
        }
    }
}

/// POST /api/v1/data/ingest/bulk
///
/// Every device must exist in the caller's organization before anything is
/// ingested. After that, items succeed or fail independently.
pub async fn bulk_ingest(
    State(hub): State<Arc<TelemetryHub>>,
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<BulkIngestRequest>,
) -> Result<Response, ApiError> {
    let devices = DeviceService::new(pool.clone());
    for item in &request.telemetry {
        let device = devices
            .find_by_external_id(&item.device_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Device not found: {}", item.device_id)))?;
        if device.organization_id != auth.organization_id {
            tracing::warn!(
                "Bulk ingest denied: device {} is outside organization {}",
                item.device_id,
                auth.organization_id
            );
            let body = BulkIngestResult::rejected(request.telemetry.len());
            return Ok((StatusCode::FORBIDDEN, Json(body)).into_response());
        }
    }

    let service = TelemetryService::new(pool, hub);
    let mut result = BulkIngestResult::default();
    for item in request.telemetry {
        let device_id = item.device_id.clone();
        match service.ingest(item.into(), Some(auth.organization_id)).await {
            Ok(_) => result.success_count += 1,
            Err(e) => {
                tracing::error!("Failed to ingest telemetry for device {}: {}", device_id, e);
                result.failure_count += 1;
            }
        }
    }

    tracing::info!(
        "Bulk ingestion complete: {} succeeded, {} failed",
        result.success_count,
        result.failure_count
    );
    Ok(Json(result).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_ids_are_split_and_trimmed() {
        assert_eq!(split_device_ids("a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_device_ids("").is_empty());
    }

    #[test]
    fn rejected_bulk_counts_every_item() {
        assert_eq!(
            serde_json::to_value(BulkIngestResult::rejected(3)).unwrap(),
            json!({"successCount": 0, "failureCount": 3})
        );
    }

    #[test]
    fn bulk_items_become_payloads() {
        let request: BulkIngestRequest = serde_json::from_value(json!({
            "telemetry": [{"deviceId": "meter-1", "variables": {"kw": 3.5}}]
        }))
        .unwrap();
        let payload: TelemetryPayload = request.telemetry.into_iter().next().unwrap().into();
        assert_eq!(payload.device_id, "meter-1");
        assert_eq!(payload.variables["kw"], 3.5);
        assert!(payload.timestamp.is_none());
    }
}
