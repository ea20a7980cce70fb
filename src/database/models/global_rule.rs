use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{AggregationFunction, AlertSeverity, RuleOperator, SelectorType};

/// Fleet-wide rule evaluated over an aggregate of many devices
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GlobalRule {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub selector_type: SelectorType,
    pub selector_value: Option<String>,
    pub aggregation_function: AggregationFunction,
    pub aggregation_variable: Option<String>,
    pub aggregation_params: Option<serde_json::Value>,
    pub operator: RuleOperator,
    pub threshold: f64,
    pub enabled: bool,
    pub evaluation_interval: String,
    pub cooldown_minutes: i32,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GlobalAlert {
    pub id: Uuid,
    pub global_rule_id: Uuid,
    pub organization_id: Uuid,
    pub message: String,
    pub severity: AlertSeverity,
    pub triggered_value: f64,
    pub device_count: i32,
    pub affected_devices: serde_json::Value,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
}
