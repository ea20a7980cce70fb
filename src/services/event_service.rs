use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::ServiceResult;
use crate::database::models::Event;
use crate::types::{EventSeverity, EventType};

/// An event about to be recorded
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub organization_id: Uuid,
    pub event_type: EventType,
    pub severity: EventSeverity,
    pub title: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<Value>,
    pub device_id: Option<String>,
}

impl EventDraft {
    pub fn new(
        organization_id: Uuid,
        event_type: EventType,
        severity: EventSeverity,
        title: impl Into<String>,
    ) -> Self {
        Self {
            organization_id,
            event_type,
            severity,
            title: title.into(),
            entity_type: None,
            entity_id: None,
            description: None,
            metadata: None,
            device_id: None,
        }
    }

    pub fn entity(mut self, entity_type: &str, entity_id: impl ToString) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn device(mut self, external_id: impl Into<String>) -> Self {
        self.device_id = Some(external_id.into());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub severity: Option<EventSeverity>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EventCount {
    pub key: String,
    pub count: i64,
}

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// One year
const MAX_LOOKBACK_HOURS: i64 = 24 * 365;

/// Start of a look-back of `hours`, clamped to between one hour and a year
fn look_back_start(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now - Duration::hours(hours.clamp(1, MAX_LOOKBACK_HOURS))
}

pub struct EventService {
    pool: PgPool,
}

impl EventService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn emit(&self, draft: EventDraft) -> ServiceResult<Event> {
        let event = sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO events
                (organization_id, event_type, severity, entity_type, entity_id,
                 title, description, metadata, device_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(draft.organization_id)
        .bind(draft.event_type)
        .bind(draft.severity)
        .bind(&draft.entity_type)
        .bind(&draft.entity_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.metadata)
        .bind(&draft.device_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            "Event {} ({}) recorded for organization {}",
            event.event_type,
            event.severity,
            event.organization_id
        );
        Ok(event)
    }

    /// Record an event without failing the caller
    pub async fn emit_quietly(&self, draft: EventDraft) {
        let event_type = draft.event_type;
        if let Err(e) = self.emit(draft).await {
            tracing::warn!("Failed to record {} event: {}", event_type, e);
        }
    }

    pub async fn list(&self, organization_id: Uuid, filter: &EventFilter) -> ServiceResult<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(
            r#"
            SELECT * FROM events
            WHERE organization_id = $1
              AND ($2::text IS NULL OR event_type = $2)
              AND ($3::text IS NULL OR severity = $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(organization_id)
        .bind(filter.event_type.map(|t| t.as_str()))
        .bind(filter.severity.map(|s| s.as_str()))
        .bind(clamp_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    pub async fn recent(&self, organization_id: Uuid, hours: i64, limit: Option<i64>) -> ServiceResult<Vec<Event>> {
        let since = look_back_start(Utc::now(), hours);
        let events = sqlx::query_as::<_, Event>(
            r#"
            SELECT * FROM events
            WHERE organization_id = $1 AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(organization_id)
        .bind(since)
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    pub async fn statistics_by_type(&self, organization_id: Uuid, hours: i64) -> ServiceResult<Vec<EventCount>> {
        self.count_by("event_type", organization_id, hours).await
    }

    pub async fn statistics_by_severity(&self, organization_id: Uuid, hours: i64) -> ServiceResult<Vec<EventCount>> {
        self.count_by("severity", organization_id, hours).await
    }

    async fn count_by(&self, column: &'static str, organization_id: Uuid, hours: i64) -> ServiceResult<Vec<EventCount>> {
        let since = look_back_start(Utc::now(), hours);
        let sql = format!(
            "SELECT {column} AS key, COUNT(*) AS count FROM events \
             WHERE organization_id = $1 AND created_at >= $2 \
             GROUP BY {column} ORDER BY count DESC"
        );
        let counts = sqlx::query_as::<_, EventCount>(&sql)
            .bind(organization_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_builder_fills_optional_fields() {
        let org = Uuid::new_v4();
        let draft = EventDraft::new(org, EventType::DeviceCreated, EventSeverity::Info, "Device created")
            .entity("DEVICE", "abc")
            .device("sensor-1")
            .description("created through the API");
        assert_eq!(draft.organization_id, org);
        assert_eq!(draft.entity_type.as_deref(), Some("DEVICE"));
        assert_eq!(draft.entity_id.as_deref(), Some("abc"));
        assert_eq!(draft.device_id.as_deref(), Some("sensor-1"));
        assert!(draft.metadata.is_none());
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(None), 100);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(50_000)), 1000);
    }

    #[test]
    fn look_back_is_clamped() {
        let now = Utc::now();
        assert_eq!(now - look_back_start(now, 0), Duration::hours(1));
        assert_eq!(now - look_back_start(now, 48), Duration::hours(48));
        assert_eq!(now - look_back_start(now, i64::MAX), Duration::hours(MAX_LOOKBACK_HOURS));
    }
}
