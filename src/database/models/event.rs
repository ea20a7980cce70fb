use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::{EventSeverity, EventType};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub organization_id: Uuid,
    pub event_type: EventType,
    pub severity: EventSeverity,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub device_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
