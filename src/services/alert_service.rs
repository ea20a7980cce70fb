use sqlx::PgPool;
use uuid::Uuid;

use super::{EventDraft, EventService, ServiceError, ServiceResult};
use crate::database::models::Alert;
use crate::types::{EventSeverity, EventType};

pub struct AlertService {
    pool: PgPool,
}

impl AlertService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Newest first
    pub async fn list(&self, organization_id: Uuid, limit: Option<i64>) -> ServiceResult<Vec<Alert>> {
        let alerts = sqlx::query_as::<_, Alert>(
            "SELECT * FROM alerts WHERE organization_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(organization_id)
        .bind(limit.unwrap_or(100).clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }

    pub async fn unacknowledged(&self, organization_id: Uuid) -> ServiceResult<Vec<Alert>> {
        let alerts = sqlx::query_as::<_, Alert>(
            "SELECT * FROM alerts WHERE organization_id = $1 AND acknowledged = FALSE ORDER BY created_at DESC",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }

    /// Mark an alert as seen. Acknowledging twice returns the alert unchanged.
    pub async fn acknowledge(&self, organization_id: Uuid, alert_id: Uuid, actor: &str) -> ServiceResult<Alert> {
        let alert = sqlx::query_as::<_, Alert>("SELECT * FROM alerts WHERE id = $1")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Alert not found: {}", alert_id)))?;

        if alert.organization_id != organization_id {
            return Err(ServiceError::access_denied("Access denied to alert"));
        }
        if alert.acknowledged {
            return Ok(alert);
        }

        let alert = sqlx::query_as::<_, Alert>(
            r#"
            UPDATE alerts SET acknowledged = TRUE, acknowledged_at = now(), acknowledged_by = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(alert_id)
        .bind(actor)
        .fetch_one(&self.pool)
        .await?;

        EventService::new(self.pool.clone())
            .emit_quietly(
                EventDraft::new(organization_id, EventType::AlertAcknowledged, EventSeverity::Info, "Alert acknowledged")
                    .entity("ALERT", alert.id)
                    .description(format!("Acknowledged by {}", actor)),
            )
            .await;
        Ok(alert)
    }
}
