use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::services::TelemetryPayload;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PayloadError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("Payload must be a JSON object")]
    NotAnObject,
    #[error("deviceId is required")]
    MissingDeviceId,
}

/// A telemetry message received over MQTT
#[derive(Debug, Clone)]
pub struct MqttTelemetry {
    pub payload: TelemetryPayload,
    pub api_token: Option<String>,
}

pub fn parse_payload(bytes: &[u8]) -> Result<MqttTelemetry, PayloadError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;
    let Value::Object(object) = value else {
        return Err(PayloadError::NotAnObject);
    };

    let device_id = match object.get("deviceId") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
        _ => return Err(PayloadError::MissingDeviceId),
    };

    let timestamp = object
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);

    let variables = match object.get("variables") {
        Some(Value::Object(vars)) => numeric_variables(vars),
        _ => BTreeMap::new(),
    };

    let metadata = match object.get("metadata") {
        Some(Value::Object(meta)) => meta.clone(),
        _ => Map::new(),
    };

    let api_token = object
        .get("apiToken")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from);

    Ok(MqttTelemetry {
        payload: TelemetryPayload {
            device_id,
            timestamp: Some(timestamp),
            variables,
            metadata,
        },
        api_token,
    })
}

/// RFC 3339 first, then a zone-less ISO local time read as UTC
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn numeric_variables(vars: &Map<String, Value>) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for (name, value) in vars {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        };
        match number {
            Some(v) => {
                out.insert(name.clone(), v);
            }
            None => tracing::debug!("Skipping non-numeric variable '{}': {}", name, value),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_message() {
        let msg = parse_payload(
            br#"{
                "deviceId": "meter-1",
                "timestamp": "2024-06-01T10:15:00Z",
                "variables": {"voltage": 230.1, "current": "4.5", "label": "main", "ok": true},
                "metadata": {"location": "Plant A"},
                "apiToken": "2f1c3a7e-0b7d-4a51-9f52-0c3b8e0f6d21"
            }"#,
        )
        .unwrap();

        assert_eq!(msg.payload.device_id, "meter-1");
        assert_eq!(msg.payload.variables.len(), 2);
        assert_eq!(msg.payload.variables["current"], 4.5);
        assert_eq!(msg.payload.metadata["location"], "Plant A");
        assert_eq!(msg.api_token.as_deref(), Some("2f1c3a7e-0b7d-4a51-9f52-0c3b8e0f6d21"));
        assert_eq!(
            msg.payload.timestamp.unwrap().to_rfc3339(),
            "2024-06-01T10:15:00+00:00"
        );
    }

    #[test]
    fn device_id_is_required() {
        assert_eq!(
            parse_payload(br#"{"variables": {"a": 1}}"#).unwrap_err(),
            PayloadError::MissingDeviceId
        );
        assert_eq!(
            parse_payload(br#"{"deviceId": "  "}"#).unwrap_err(),
            PayloadError::MissingDeviceId
        );
        assert_eq!(parse_payload(b"[1,2]").unwrap_err(), PayloadError::NotAnObject);
        assert!(matches!(parse_payload(b"not json"), Err(PayloadError::InvalidJson(_))));
    }

    #[test]
    fn timestamp_fallbacks() {
        let naive = parse_timestamp("2024-06-01T10:15:30.250").unwrap();
        assert_eq!(naive.to_rfc3339(), "2024-06-01T10:15:30.250+00:00");
        assert!(parse_timestamp("yesterday").is_none());

        let before = Utc::now();
        let msg = parse_payload(br#"{"deviceId": "d", "timestamp": "soon"}"#).unwrap();
        assert!(msg.payload.timestamp.unwrap() >= before);
    }
}
