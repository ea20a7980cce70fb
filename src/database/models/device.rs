use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::DeviceStatus;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub location: Option<String>,
    pub sensor_type: Option<String>,
    pub firmware_version: Option<String>,
    pub status: DeviceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    /// Never serialized; exposed only through the token endpoints
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub token_created_at: Option<DateTime<Utc>>,
    pub token_last_used_at: Option<DateTime<Utc>>,
    pub health_score: i32,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub deletion_reason: Option<String>,
}

impl Device {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
