//! Fleet-wide rules: CRUD plus the periodic evaluator.

pub mod aggregator;
pub mod interval;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

pub use aggregator::{AggregationResult, FleetAggregator};

use super::{EventDraft, EventService, ServiceError, ServiceResult};
use crate::database::models::{GlobalAlert, GlobalRule};
use crate::database::Repository;
use crate::types::{AggregationFunction, AlertSeverity, EventType, RuleOperator, SelectorType};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRuleRequest {
    pub name: String,
    pub description: Option<String>,
    pub selector_type: SelectorType,
    pub selector_value: Option<String>,
    pub aggregation_function: String,
    pub aggregation_variable: Option<String>,
    pub aggregation_params: Option<serde_json::Value>,
    pub operator: RuleOperator,
    pub threshold: f64,
    pub enabled: Option<bool>,
    pub evaluation_interval: Option<String>,
    pub cooldown_minutes: Option<i32>,
}

impl GlobalRuleRequest {
    /// Checks the request and resolves its aggregation function
    pub fn validate(&self) -> ServiceResult<AggregationFunction> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::bad_request("Global rule name is required"));
        }
        let function = validate_aggregation(&self.aggregation_function, self.aggregation_variable.as_deref())?;
        if !self.threshold.is_finite() {
            return Err(ServiceError::bad_request("Global rule threshold must be a finite number"));
        }
        if matches!(self.cooldown_minutes, Some(minutes) if minutes < 0) {
            return Err(ServiceError::bad_request("Cooldown minutes cannot be negative"));
        }
        if let Some(every) = self.evaluation_interval.as_deref() {
            if interval::parse_minutes(every).is_none() {
                return Err(ServiceError::bad_request(format!(
                    "Invalid evaluation interval '{}': use e.g. 5m, 1h or every_2_hours, at most one week",
                    every
                )));
            }
        }
        Ok(function)
    }
}

pub fn validate_aggregation(name: &str, variable: Option<&str>) -> ServiceResult<AggregationFunction> {
    let function: AggregationFunction = name
        .parse()
        .map_err(|_| ServiceError::bad_request(format!("Invalid aggregation function: {}", name)))?;

    let has_variable = variable.map(|v| !v.trim().is_empty()).unwrap_or(false);
    if function.requires_variable() && !has_variable {
        return Err(ServiceError::bad_request(format!(
            "Aggregation function {} requires a variable",
            function
        )));
    }
    Ok(function)
}

pub fn global_alert_message(rule: &GlobalRule, result: &AggregationResult) -> String {
    format!(
        "Global rule '{}' triggered: {}({}) {} {} (actual: {}, {} devices in scope)",
        rule.name,
        rule.aggregation_function,
        rule.aggregation_variable.as_deref().unwrap_or(""),
        rule.operator.symbol(),
        rule.threshold,
        result.value,
        result.device_count
    )
}

pub struct GlobalRuleService {
    pool: PgPool,
}

impl GlobalRuleService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn repository(&self) -> Repository<GlobalRule> {
        Repository::new("global_rules", "Global rule", self.pool.clone())
    }

    pub async fn list(&self, organization_id: Uuid) -> ServiceResult<Vec<GlobalRule>> {
        Ok(self.repository().list_in_org(organization_id).await?)
    }

    pub async fn get(&self, organization_id: Uuid, rule_id: Uuid) -> ServiceResult<GlobalRule> {
        let rule = self
            .repository()
            .find_by_id(rule_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Global rule not found: {}", rule_id)))?;

        if rule.organization_id != organization_id {
            return Err(ServiceError::bad_request("Global rule does not belong to organization"));
        }
        Ok(rule)
    }

    pub async fn create(&self, organization_id: Uuid, request: GlobalRuleRequest) -> ServiceResult<GlobalRule> {
        let function = request.validate()?;
        tracing::info!("Creating global rule: {} for organization {}", request.name, organization_id);

        let rule = sqlx::query_as::<_, GlobalRule>(
            r#"
            INSERT INTO global_rules (
                organization_id, name, description, selector_type, selector_value,
                aggregation_function, aggregation_variable, aggregation_params,
                operator, threshold, enabled, evaluation_interval, cooldown_minutes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, COALESCE($12, '5m'), COALESCE($13, 5))
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(request.selector_type)
        .bind(&request.selector_value)
        .bind(function)
        .bind(&request.aggregation_variable)
        .bind(&request.aggregation_params)
        .bind(request.operator)
        .bind(request.threshold)
        .bind(request.enabled.unwrap_or(true))
        .bind(&request.evaluation_interval)
        .bind(request.cooldown_minutes)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Created global rule: {} ({})", rule.name, rule.id);
        Ok(rule)
    }

    pub async fn update(&self, organization_id: Uuid, rule_id: Uuid, request: GlobalRuleRequest) -> ServiceResult<GlobalRule> {
        self.get(organization_id, rule_id).await?;
        let function = request.validate()?;

        let rule = sqlx::query_as::<_, GlobalRule>(
            r#"
            UPDATE global_rules SET
                name = $2, description = $3, selector_type = $4, selector_value = $5,
                aggregation_function = $6, aggregation_variable = $7, aggregation_params = $8,
                operator = $9, threshold = $10, enabled = COALESCE($11, enabled),
                evaluation_interval = COALESCE($12, evaluation_interval),
                cooldown_minutes = COALESCE($13, cooldown_minutes),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(rule_id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(request.selector_type)
        .bind(&request.selector_value)
        .bind(function)
        .bind(&request.aggregation_variable)
        .bind(&request.aggregation_params)
        .bind(request.operator)
        .bind(request.threshold)
        .bind(request.enabled)
        .bind(&request.evaluation_interval)
        .bind(request.cooldown_minutes)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Updated global rule: {}", rule_id);
        Ok(rule)
    }

    pub async fn delete(&self, organization_id: Uuid, rule_id: Uuid) -> ServiceResult<()> {
        self.get(organization_id, rule_id).await?;
        sqlx::query("DELETE FROM global_rules WHERE id = $1")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;
        tracing::info!("Deleted global rule: {}", rule_id);
        Ok(())
    }

    pub async fn toggle(&self, organization_id: Uuid, rule_id: Uuid) -> ServiceResult<GlobalRule> {
        self.get(organization_id, rule_id).await?;
        let rule = sqlx::query_as::<_, GlobalRule>(
            "UPDATE global_rules SET enabled = NOT enabled, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(rule_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            "Toggled global rule {} to {}",
            rule_id,
            if rule.enabled { "enabled" } else { "disabled" }
        );
        Ok(rule)
    }

    /// Run one rule immediately, subject to the usual due and cooldown checks
    pub async fn evaluate_now(&self, organization_id: Uuid, rule_id: Uuid) -> ServiceResult<Option<GlobalAlert>> {
        let rule = self.get(organization_id, rule_id).await?;
        tracing::info!("Manually evaluating global rule: {}", rule_id);
        self.evaluate(&rule).await
    }

    /// Evaluate every enabled rule; returns how many alerts were raised
    pub async fn evaluate_all_due(&self) -> ServiceResult<usize> {
        let rules = sqlx::query_as::<_, GlobalRule>("SELECT * FROM global_rules WHERE enabled = TRUE")
            .fetch_all(&self.pool)
            .await?;

        if rules.is_empty() {
            tracing::debug!("No global rules due for evaluation");
            return Ok(0);
        }

        let mut raised = 0;
        for rule in &rules {
            match self.evaluate(rule).await {
                Ok(Some(_)) => raised += 1,
                Ok(None) => {}
                Err(e) => tracing::error!("Error evaluating global rule {}: {}", rule.id, e),
            }
        }
        Ok(raised)
    }

    pub async fn evaluate(&self, rule: &GlobalRule) -> ServiceResult<Option<GlobalAlert>> {
        if !rule.enabled {
            tracing::debug!("Global rule {} is disabled, skipping", rule.id);
            return Ok(None);
        }

        let now = Utc::now();
        if !interval::is_due(rule.last_evaluated_at, &rule.evaluation_interval, now) {
            tracing::debug!("Global rule {} not due for evaluation yet", rule.id);
            return Ok(None);
        }

        let result = FleetAggregator::new(self.pool.clone()).aggregate(rule).await?;

        sqlx::query("UPDATE global_rules SET last_evaluated_at = $2 WHERE id = $1")
            .bind(rule.id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if !rule.operator.evaluate(result.value, rule.threshold) {
            tracing::debug!(
                "Global rule {} condition not met: {} {} {} (actual: {})",
                rule.name,
                rule.aggregation_function,
                rule.operator.symbol(),
                rule.threshold,
                result.value
            );
            return Ok(None);
        }

        if interval::in_cooldown(rule.last_triggered_at, rule.cooldown_minutes, now) {
            tracing::debug!("Global rule {} is in cooldown period, skipping alert", rule.name);
            return Ok(None);
        }

        self.trigger(rule, &result).await.map(Some)
    }

    async fn trigger(&self, rule: &GlobalRule, result: &AggregationResult) -> ServiceResult<GlobalAlert> {
        let severity = AlertSeverity::from_deviation(result.value, rule.threshold);
        let message = global_alert_message(rule, result);

        let mut tx = self.pool.begin().await?;
        let alert = sqlx::query_as::<_, GlobalAlert>(
            r#"
            INSERT INTO global_alerts (
                global_rule_id, organization_id, message, severity,
                triggered_value, device_count, affected_devices
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(rule.id)
        .bind(rule.organization_id)
        .bind(&message)
        .bind(severity)
        .bind(result.value)
        .bind(result.device_count as i32)
        .bind(json!(result.affected_devices))
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE global_rules SET last_triggered_at = $2 WHERE id = $1")
            .bind(rule.id)
            .bind(alert.triggered_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!("Global alert triggered: {} for rule {}", message, rule.name);

        let events = EventService::new(self.pool.clone());
        let event_severity = severity.event_severity();
        events
            .emit_quietly(
                EventDraft::new(rule.organization_id, EventType::RuleTriggered, event_severity, format!("Rule triggered: {}", rule.name))
                    .entity("GLOBAL_RULE", rule.id)
                    .description(message.clone()),
            )
            .await;
        events
            .emit_quietly(
                EventDraft::new(rule.organization_id, EventType::AlertCreated, event_severity, "Alert created for FLEET-WIDE")
                    .entity("GLOBAL_ALERT", alert.id)
                    .device("FLEET-WIDE")
                    .description(message),
            )
            .await;

        Ok(alert)
    }

    /// Newest first
    pub async fn list_alerts(&self, organization_id: Uuid, unacknowledged_only: bool) -> ServiceResult<Vec<GlobalAlert>> {
        let alerts = sqlx::query_as::<_, GlobalAlert>(
            r#"
            SELECT * FROM global_alerts
            WHERE organization_id = $1 AND ($2 = FALSE OR acknowledged = FALSE)
            ORDER BY triggered_at DESC
            LIMIT 500
            "#,
        )
        .bind(organization_id)
        .bind(unacknowledged_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }

    pub async fn acknowledge_alert(&self, organization_id: Uuid, alert_id: Uuid, actor: &str) -> ServiceResult<GlobalAlert> {
        let alert = sqlx::query_as::<_, GlobalAlert>("SELECT * FROM global_alerts WHERE id = $1")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Global alert not found: {}", alert_id)))?;

        if alert.organization_id != organization_id {
            return Err(ServiceError::access_denied("Access denied to alert"));
        }
        if alert.acknowledged {
            return Ok(alert);
        }

        let alert = sqlx::query_as::<_, GlobalAlert>(
            r#"
            UPDATE global_alerts SET acknowledged = TRUE, acknowledged_at = now(), acknowledged_by = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(alert_id)
        .bind(actor)
        .fetch_one(&self.pool)
        .await?;
        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(function: AggregationFunction, variable: Option<&str>) -> GlobalRule {
        GlobalRule {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "Fleet temp".into(),
            description: None,
            selector_type: SelectorType::Organization,
            selector_value: None,
            aggregation_function: function,
            aggregation_variable: variable.map(String::from),
            aggregation_params: None,
            operator: RuleOperator::Gt,
            threshold: 30.0,
            enabled: true,
            evaluation_interval: "5m".into(),
            cooldown_minutes: 5,
            last_evaluated_at: None,
            last_triggered_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn unknown_function_is_rejected() {
        let err = validate_aggregation("MEDIAN", Some("temperature")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid aggregation function: MEDIAN");
    }

    #[test]
    fn metric_functions_need_a_variable() {
        let err = validate_aggregation("AVG", Some("  ")).unwrap_err();
        assert_eq!(err.to_string(), "Aggregation function AVG requires a variable");
        assert_eq!(
            validate_aggregation("avg", Some("temperature")).unwrap(),
            AggregationFunction::Avg
        );
        assert_eq!(
            validate_aggregation("COUNT_ONLINE", None).unwrap(),
            AggregationFunction::CountOnline
        );
    }

    #[test]
    fn alert_message_names_function_and_scope() {
        let r = rule(AggregationFunction::Avg, Some("temperature"));
        let result = AggregationResult {
            value: 32.5,
            device_count: 12,
            affected_devices: vec![],
        };
        assert_eq!(
            global_alert_message(&r, &result),
            "Global rule 'Fleet temp' triggered: AVG(temperature) > 30 (actual: 32.5, 12 devices in scope)"
        );

        let count = rule(AggregationFunction::CountOffline, None);
        assert!(global_alert_message(&count, &result).contains("COUNT_OFFLINE()"));
    }

    fn request() -> GlobalRuleRequest {
        GlobalRuleRequest {
            name: "r".into(),
            description: None,
            selector_type: SelectorType::Tag,
            selector_value: Some("floor-1".into()),
            aggregation_function: "COUNT_OFFLINE".into(),
            aggregation_variable: None,
            aggregation_params: None,
            operator: RuleOperator::Gte,
            threshold: 3.0,
            enabled: None,
            evaluation_interval: None,
            cooldown_minutes: None,
        }
    }

    #[test]
    fn request_rejects_negative_cooldown() {
        let request = GlobalRuleRequest {
            cooldown_minutes: Some(-1),
            ..request()
        };
        assert!(matches!(request.validate(), Err(ServiceError::BadRequest(_))));
    }

    #[test]
    fn request_rejects_unreadable_or_oversized_interval() {
        for bad in ["soon", "every_999999999999999999_hours", "8d", "20000m"] {
            let request = GlobalRuleRequest {
                evaluation_interval: Some(bad.into()),
                ..request()
            };
            assert!(matches!(request.validate(), Err(ServiceError::BadRequest(_))), "{}", bad);
        }
        let ok = GlobalRuleRequest {
            evaluation_interval: Some("every_2_hours".into()),
            ..request()
        };
        assert_eq!(ok.validate().unwrap(), AggregationFunction::CountOffline);
    }

    #[test]
    fn stored_rule_interval_drives_due_check() {
        let now = Utc::now();
        let mut r = rule(AggregationFunction::CountOffline, None);
        assert!(interval::is_due(r.last_evaluated_at, &r.evaluation_interval, now));

        r.last_evaluated_at = Some(now - chrono::Duration::minutes(3));
        assert!(!interval::is_due(r.last_evaluated_at, &r.evaluation_interval, now));

        r.evaluation_interval = "every_2_hours".into();
        r.last_evaluated_at = Some(now - chrono::Duration::minutes(119));
        assert!(!interval::is_due(r.last_evaluated_at, &r.evaluation_interval, now));
        r.last_evaluated_at = Some(now - chrono::Duration::minutes(121));
        assert!(interval::is_due(r.last_evaluated_at, &r.evaluation_interval, now));

        r.evaluation_interval = "999999999999999m".into();
        r.last_evaluated_at = Some(now - chrono::Duration::minutes(6));
        assert!(interval::is_due(r.last_evaluated_at, &r.evaluation_interval, now));
    }
}
