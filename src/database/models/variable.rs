use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{DataSource, DataType};

/// A named telemetry channel. `device_id` is NULL for organization templates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Variable {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub device_id: Option<Uuid>,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub data_type: DataType,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub decimal_places: i32,
    pub is_system_variable: bool,
    pub data_source: DataSource,
    pub last_value: Option<f64>,
    pub last_value_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VariableValue {
    pub id: i64,
    pub variable_id: Uuid,
    pub telemetry_record_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub created_at: DateTime<Utc>,
}
