use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyntheticVariable {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub device_id: Uuid,
    pub name: String,
    pub expression: String,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyntheticVariableValue {
    pub id: i64,
    pub synthetic_variable_id: Uuid,
    pub telemetry_record_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub created_at: DateTime<Utc>,
}
