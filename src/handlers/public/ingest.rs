// handlers/public/ingest.rs - device-facing ingestion
//
// POST /api/v1/ingest/:device_id       X-API-Key, flat `{"name": value}` body
// POST /api/v1/data/ingest/:device_id  X-Device-Token or bearer JWT

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::auth::decode_jwt;
use crate::database::manager::DatabaseManager;
use crate::error::ApiError;
use crate::middleware::auth::extract_bearer_token;
use crate::middleware::AuthUser;
use crate::realtime::TelemetryHub;
use crate::services::{DeviceService, DeviceTokenService, TelemetryPayload, TelemetryService};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const DEVICE_TOKEN_HEADER: &str = "x-device-token";

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The X-API-Key header, which must at least look like a UUID
pub fn api_key(headers: &HeaderMap) -> Result<&str, ApiError> {
    let key = header_value(headers, API_KEY_HEADER)
        .ok_or_else(|| ApiError::unauthorized("X-API-Key header is required"))?;
    if Uuid::parse_str(key).is_err() {
        return Err(ApiError::unauthorized("Invalid API key format. Expected UUID."));
    }
    Ok(key)
}

/// Numbers pass, numeric strings are parsed and nulls are dropped
pub fn numeric_fields(body: &Map<String, Value>) -> Result<BTreeMap<String, f64>, ApiError> {
    let mut values = BTreeMap::new();
    for (field, value) in body {
        let number = match value {
            Value::Null => continue,
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| ApiError::bad_request(format!("Unsupported data type for field '{}'", field)))?,
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    ApiError::bad_request(format!(
                        "Invalid numeric value for field '{}': '{}' is not a valid number",
                        field, text
                    ))
                })?,
            _ => {
                return Err(ApiError::bad_request(format!(
                    "Unsupported data type for field '{}'",
                    field
                )))
            }
        };
        values.insert(field.clone(), number);
    }

    if values.is_empty() {
        return Err(ApiError::bad_request("At least one numeric variable is required"));
    }
    Ok(values)
}

/// Parse the body only after the caller is authenticated
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))
}

pub async fn api_key_ingest(
    State(hub): State<Arc<TelemetryHub>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let key = api_key(&headers)?;
    let pool = DatabaseManager::main_pool().await?;
    let tokens = DeviceTokenService::new(pool.clone());

    let owner = tokens
        .get_device_by_token(key)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid API key"))?;

    if let Some(target) = DeviceService::new(pool.clone()).find_by_external_id(&device_id).await? {
        if target.organization_id != owner.organization_id {
            tracing::warn!(
                "API key of device {} used to send data to {} in another organization",
                owner.external_id,
                device_id
            );
            return Err(ApiError::forbidden("Cannot send data to device in different organization"));
        }
    }

    let fields: Map<String, Value> = parse_body(&body)?;
    let variables = numeric_fields(&fields)?;
    tokens.update_token_last_used(key).await?;

    TelemetryService::new(pool, hub)
        .ingest(TelemetryPayload::new(device_id, variables), Some(owner.organization_id))
        .await?;

    Ok(Json(json!({ "success": true, "message": "Data received successfully" })))
}

#[derive(Debug, Deserialize)]
pub struct DeviceIngestBody {
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variables: BTreeMap<String, f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// How a caller of the device ingestion route proved who it is
#[derive(Debug)]
pub enum DeviceCredential {
    DeviceToken(String),
    User(AuthUser),
}

/// X-Device-Token wins over a bearer JWT. Resolved before any database work.
pub fn device_credential(headers: &HeaderMap) -> Result<DeviceCredential, ApiError> {
    if let Some(token) = header_value(headers, DEVICE_TOKEN_HEADER) {
        return Ok(DeviceCredential::DeviceToken(token.to_string()));
    }
    let token = extract_bearer_token(headers).map_err(ApiError::unauthorized)?;
    let claims = decode_jwt(&token).map_err(|e| ApiError::unauthorized(e.to_string()))?;
    Ok(DeviceCredential::User(AuthUser::from(claims)))
}

pub async fn device_ingest(
    State(hub): State<Arc<TelemetryHub>>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let credential = device_credential(&headers)?;
    let pool = DatabaseManager::main_pool().await?;

    let organization_id = match credential {
        DeviceCredential::DeviceToken(token) => {
            let tokens = DeviceTokenService::new(pool.clone());
            let device = tokens.get_device_by_token(&token).await?.ok_or_else(|| {
                tracing::warn!("Invalid device token provided for device {}", device_id);
                ApiError::unauthorized("Invalid device token")
            })?;
            if device.external_id != device_id {
                tracing::warn!("Device ID mismatch: token for {}, requested {}", device.external_id, device_id);
                return Err(ApiError::forbidden("Device ID mismatch"));
            }
            tokens.update_token_last_used(&token).await?;
            device.organization_id
        }
        DeviceCredential::User(user) => {
            let device = DeviceService::new(pool.clone())
                .find_by_external_id(&device_id)
                .await?
                .ok_or_else(|| ApiError::not_found(format!("Device not found: {}", device_id)))?;
            if device.organization_id != user.organization_id {
                return Err(ApiError::forbidden("Access denied to device"));
            }
            user.organization_id
        }
    };

    let body: DeviceIngestBody = parse_body(&body)?;
    let payload = TelemetryPayload {
        device_id,
        timestamp: body.timestamp,
        variables: body.variables,
        metadata: body.metadata,
    };
    TelemetryService::new(pool, hub).ingest(payload, Some(organization_id)).await?;

    Ok(Json(json!({ "success": true, "message": "Telemetry data ingested successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn api_key_must_be_present_and_uuid_shaped() {
        let mut headers = HeaderMap::new();
        assert_eq!(api_key(&headers).unwrap_err().message(), "X-API-Key header is required");

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("not-a-key"));
        assert_eq!(
            api_key(&headers).unwrap_err().message(),
            "Invalid API key format. Expected UUID."
        );

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("5b0e6c9e-1a52-4c1e-9a34-0e7d3c0f9a11"));
        assert_eq!(api_key(&headers).unwrap(), "5b0e6c9e-1a52-4c1e-9a34-0e7d3c0f9a11");
    }

    #[test]
    fn numbers_and_numeric_strings_are_accepted() {
        let values = numeric_fields(&body(json!({
            "temperature": 21.5,
            "humidity": "48",
            "note": null
        })))
        .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["temperature"], 21.5);
        assert_eq!(values["humidity"], 48.0);
    }

    #[test]
    fn unsupported_types_are_rejected() {
        let err = numeric_fields(&body(json!({"on": true}))).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.message(), "Unsupported data type for field 'on'");
    }

    #[test]
    fn unparsable_strings_are_rejected() {
        let err = numeric_fields(&body(json!({"temp": "warm"}))).unwrap_err();
        assert_eq!(
            err.message(),
            "Invalid numeric value for field 'temp': 'warm' is not a valid number"
        );
        assert!(numeric_fields(&body(json!({"temp": "NaN"}))).is_err());
    }

    #[test]
    fn at_least_one_value_is_required() {
        let err = numeric_fields(&body(json!({"a": null}))).unwrap_err();
        assert_eq!(err.message(), "At least one numeric variable is required");
    }

    #[test]
    fn device_token_takes_precedence() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            device_credential(&headers).unwrap_err().message(),
            "Missing Authorization header"
        );

        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer junk"));
        assert_eq!(device_credential(&headers).unwrap_err().status_code(), 401);

        headers.insert(DEVICE_TOKEN_HEADER, HeaderValue::from_static("tok-123"));
        assert!(matches!(
            device_credential(&headers).unwrap(),
            DeviceCredential::DeviceToken(t) if t == "tok-123"
        ));
    }

    #[test]
    fn device_body_defaults() {
        let parsed: DeviceIngestBody = parse_body(&Bytes::from_static(br#"{"variables":{"v":1}}"#)).unwrap();
        assert!(parsed.timestamp.is_none());
        assert!(parsed.metadata.is_empty());
        assert_eq!(parsed.variables["v"], 1.0);

        let err = parse_body::<DeviceIngestBody>(&Bytes::from_static(b"{")).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
