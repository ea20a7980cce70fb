use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TelemetryRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub device_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Flat `name -> number` object as received
    pub variables: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

