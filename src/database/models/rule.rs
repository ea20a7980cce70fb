use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::RuleOperator;

/// Per-device threshold rule on a single variable
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Rule {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub device_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub variable: String,
    pub operator: RuleOperator,
    pub threshold: f64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
