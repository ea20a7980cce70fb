use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::AlertSeverity;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub device_id: Uuid,
    pub message: String,
    pub severity: AlertSeverity,
    pub triggered_value: Option<f64>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub created_at: DateTime<Utc>,
}
