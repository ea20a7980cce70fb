use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{DeviceService, EventDraft, EventService, ServiceError, ServiceResult};
use crate::database::models::{Alert, Device, Rule};
use crate::database::Repository;
use crate::realtime::TelemetryHub;
use crate::types::{AlertSeverity, EventSeverity, EventType, RuleOperator};

/// Minimum gap between two alerts of the same rule
pub const RULE_COOLDOWN_MINUTES: i64 = 5;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRequest {
    pub name: String,
    pub description: Option<String>,
    /// External id of the device the rule watches
    pub device_id: String,
    pub variable: String,
    pub operator: RuleOperator,
    pub threshold: f64,
    pub enabled: Option<bool>,
}

impl RuleRequest {
    fn validate(&self) -> ServiceResult<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::bad_request("Rule name is required"));
        }
        if self.variable.trim().is_empty() {
            return Err(ServiceError::bad_request("Rule variable is required"));
        }
        if !self.threshold.is_finite() {
            return Err(ServiceError::bad_request("Rule threshold must be a finite number"));
        }
        Ok(())
    }
}

pub fn alert_message(rule: &Rule, actual: f64) -> String {
    format!(
        "Rule '{}' triggered: {} {} {} (actual: {})",
        rule.name,
        rule.variable,
        rule.operator.symbol(),
        rule.threshold,
        actual
    )
}

/// The telemetry value that trips the rule, if any
pub fn triggering_value(rule: &Rule, values: &BTreeMap<String, f64>) -> Option<f64> {
    if rule.variable.trim().is_empty() {
        return None;
    }
    let actual = *values.get(&rule.variable)?;
    rule.operator.evaluate(actual, rule.threshold).then_some(actual)
}

pub struct RuleService {
    pool: PgPool,
}

impl RuleService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn repository(&self) -> Repository<Rule> {
        Repository::new("rules", "Rule", self.pool.clone())
    }

    pub async fn list(&self, organization_id: Uuid) -> ServiceResult<Vec<Rule>> {
        Ok(self.repository().list_in_org(organization_id).await?)
    }

    pub async fn get(&self, organization_id: Uuid, rule_id: Uuid) -> ServiceResult<Rule> {
        Ok(self.repository().find_404(rule_id, organization_id).await?)
    }

    async fn device_for(&self, organization_id: Uuid, external_id: &str) -> ServiceResult<Device> {
        DeviceService::new(self.pool.clone())
            .get_in_org(organization_id, external_id)
            .await
    }

    pub async fn create(&self, organization_id: Uuid, request: RuleRequest) -> ServiceResult<Rule> {
        request.validate()?;
        let device = self.device_for(organization_id, &request.device_id).await?;

        let rule = sqlx::query_as::<_, Rule>(
            r#"
            INSERT INTO rules (organization_id, device_id, name, description, variable, operator, threshold, enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(device.id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(request.variable.trim())
        .bind(request.operator)
        .bind(request.threshold)
        .bind(request.enabled.unwrap_or(true))
        .fetch_one(&self.pool)
        .await?;

        self.emit(&rule, EventType::RuleCreated, "created").await;
        Ok(rule)
    }

    pub async fn update(&self, organization_id: Uuid, rule_id: Uuid, request: RuleRequest) -> ServiceResult<Rule> {
        request.validate()?;
        self.get(organization_id, rule_id).await?;
        let device = self.device_for(organization_id, &request.device_id).await?;

        let rule = sqlx::query_as::<_, Rule>(
            r#"
            UPDATE rules SET
                device_id = $2, name = $3, description = $4, variable = $5,
                operator = $6, threshold = $7, enabled = COALESCE($8, enabled), updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(rule_id)
        .bind(device.id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(request.variable.trim())
        .bind(request.operator)
        .bind(request.threshold)
        .bind(request.enabled)
        .fetch_one(&self.pool)
        .await?;

        self.emit(&rule, EventType::RuleUpdated, "updated").await;
        Ok(rule)
    }

    pub async fn delete(&self, organization_id: Uuid, rule_id: Uuid) -> ServiceResult<()> {
        let rule = self.get(organization_id, rule_id).await?;
        sqlx::query("DELETE FROM rules WHERE id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        self.emit(&rule, EventType::RuleDeleted, "deleted").await;
        Ok(())
    }

    async fn emit(&self, rule: &Rule, event_type: EventType, verb: &str) {
        EventService::new(self.pool.clone())
            .emit_quietly(
                EventDraft::new(
                    rule.organization_id,
                    event_type,
                    EventSeverity::Info,
                    format!("Rule {}: {}", verb, rule.name),
                )
                .entity("RULE", rule.id),
            )
            .await;
    }
}

/// Evaluates a device's threshold rules against incoming telemetry
pub struct RuleEngine {
    pool: PgPool,
    hub: Arc<TelemetryHub>,
}

impl RuleEngine {
    pub fn new(pool: PgPool, hub: Arc<TelemetryHub>) -> Self {
        Self { pool, hub }
    }

    /// Returns the alerts raised by this batch of values
    pub async fn evaluate(&self, device: &Device, values: &BTreeMap<String, f64>) -> ServiceResult<Vec<Alert>> {
        let rules = sqlx::query_as::<_, Rule>("SELECT * FROM rules WHERE device_id = $1 AND enabled = TRUE")
            .bind(device.id)
            .fetch_all(&self.pool)
            .await?;

        let mut raised = Vec::new();
        for rule in rules {
            let Some(actual) = triggering_value(&rule, values) else {
                continue;
            };

            if self.in_cooldown(rule.id).await? {
                tracing::debug!("Rule '{}' recently triggered, skipping", rule.name);
                continue;
            }

            raised.push(self.trigger(&rule, device, actual).await?);
        }
        Ok(raised)
    }

    async fn in_cooldown(&self, rule_id: Uuid) -> ServiceResult<bool> {
        let since = Utc::now() - Duration::minutes(RULE_COOLDOWN_MINUTES);
        let recent: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM alerts WHERE rule_id = $1 AND created_at >= $2)")
                .bind(rule_id)
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(recent)
    }

    async fn trigger(&self, rule: &Rule, device: &Device, actual: f64) -> ServiceResult<Alert> {
        let severity = AlertSeverity::from_deviation(actual, rule.threshold);
        let message = alert_message(rule, actual);

        let alert = sqlx::query_as::<_, Alert>(
            r#"
            INSERT INTO alerts (organization_id, rule_id, device_id, message, severity, triggered_value)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(rule.organization_id)
        .bind(rule.id)
        .bind(device.id)
        .bind(&message)
        .bind(severity)
        .bind(actual)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Alert triggered: {} for device {}", message, device.external_id);

        let events = EventService::new(self.pool.clone());
        let event_severity = severity.event_severity();
        events
            .emit_quietly(
                EventDraft::new(rule.organization_id, EventType::RuleTriggered, event_severity, format!("Rule triggered: {}", rule.name))
                    .entity("RULE", rule.id)
                    .device(&device.external_id)
                    .description(message.clone()),
            )
            .await;
        events
            .emit_quietly(
                EventDraft::new(rule.organization_id, EventType::AlertCreated, event_severity, format!("Alert created for {}", device.external_id))
                    .entity("ALERT", alert.id)
                    .device(&device.external_id)
                    .description(message.clone()),
            )
            .await;

        self.hub.broadcast_to_org(
            rule.organization_id,
            &json!({
                "type": "ALERT",
                "id": alert.id,
                "ruleId": rule.id,
                "ruleName": rule.name,
                "deviceId": device.external_id,
                "message": message,
                "severity": severity,
                "triggeredValue": actual,
                "timestamp": alert.created_at,
            }),
        );

        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(variable: &str, operator: RuleOperator, threshold: f64) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            name: "High temp".into(),
            description: None,
            variable: variable.into(),
            operator,
            threshold,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn values(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn message_format() {
        let r = rule("temperature", RuleOperator::Gt, 80.0);
        assert_eq!(
            alert_message(&r, 95.5),
            "Rule 'High temp' triggered: temperature > 80 (actual: 95.5)"
        );
    }

    #[test]
    fn fires_only_when_condition_holds() {
        let r = rule("temperature", RuleOperator::Gt, 80.0);
        assert_eq!(triggering_value(&r, &values(&[("temperature", 81.0)])), Some(81.0));
        assert_eq!(triggering_value(&r, &values(&[("temperature", 80.0)])), None);
    }

    #[test]
    fn skips_missing_or_blank_variables() {
        let r = rule("humidity", RuleOperator::Lt, 10.0);
        assert_eq!(triggering_value(&r, &values(&[("temperature", 1.0)])), None);

        let blank = rule(" ", RuleOperator::Lt, 10.0);
        assert_eq!(triggering_value(&blank, &values(&[(" ", 1.0)])), None);
    }

    #[test]
    fn request_requires_a_variable() {
        let request = RuleRequest {
            name: "r".into(),
            description: None,
            device_id: "d1".into(),
            variable: "".into(),
            operator: RuleOperator::Eq,
            threshold: 1.0,
            enabled: None,
        };
        assert_eq!(request.validate().unwrap_err().to_string(), "Rule variable is required");
    }
}
