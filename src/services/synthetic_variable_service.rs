use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::{DeviceService, EventDraft, EventService, ServiceError, ServiceResult};
use crate::database::models::{Device, SyntheticVariable, SyntheticVariableValue, TelemetryRecord};
use crate::database::Repository;
use crate::expression::statistics::{StatisticsContext, StatisticsSource};
use crate::expression::{evaluate_in_context, Expression, ExpressionError};
use crate::types::{EventSeverity, EventType};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntheticVariableRequest {
    pub name: String,
    pub expression: String,
    /// External id of the device the variable is computed for
    pub device_id: String,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

impl SyntheticVariableRequest {
    fn validate(&self) -> ServiceResult<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::bad_request("Synthetic variable name is required"));
        }
        Expression::parse(&self.expression)?;
        Ok(())
    }
}

/// Numeric variables carried by a telemetry record
pub fn numeric_variables(record: &TelemetryRecord) -> HashMap<String, f64> {
    record
        .variables
        .as_object()
        .map(|vars| {
            vars.iter()
                .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
                .collect()
        })
        .unwrap_or_default()
}

/// Reads a device's history of a variable from stored telemetry records
pub struct TelemetryStatisticsSource {
    pool: PgPool,
}

impl TelemetryStatisticsSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatisticsSource for TelemetryStatisticsSource {
    async fn values(
        &self,
        device_id: Uuid,
        variable: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<f64>, ExpressionError> {
        sqlx::query_scalar::<_, f64>(
            r#"
            SELECT (variables->>$2)::double precision
            FROM telemetry_records
            WHERE device_id = $1 AND timestamp BETWEEN $3 AND $4
              AND jsonb_typeof(variables->$2) = 'number'
            ORDER BY timestamp
            "#,
        )
        .bind(device_id)
        .bind(variable)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ExpressionError::Source(e.to_string()))
    }
}

pub struct SyntheticVariableService {
    pool: PgPool,
}

impl SyntheticVariableService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn repository(&self) -> Repository<SyntheticVariable> {
        Repository::new("synthetic_variables", "Synthetic variable", self.pool.clone())
    }

    pub async fn list(&self, organization_id: Uuid, device: Option<&str>) -> ServiceResult<Vec<SyntheticVariable>> {
        match device {
            Some(external_id) => {
                let device = DeviceService::new(self.pool.clone())
                    .get_in_org(organization_id, external_id)
                    .await?;
                let variables = sqlx::query_as::<_, SyntheticVariable>(
                    "SELECT * FROM synthetic_variables WHERE device_id = $1 ORDER BY created_at",
                )
                .bind(device.id)
                .fetch_all(&self.pool)
                .await?;
                Ok(variables)
            }
            None => Ok(self.repository().list_in_org(organization_id).await?),
        }
    }

    pub async fn get(&self, organization_id: Uuid, id: Uuid) -> ServiceResult<SyntheticVariable> {
        Ok(self.repository().find_404(id, organization_id).await?)
    }

    pub async fn create(&self, organization_id: Uuid, request: SyntheticVariableRequest) -> ServiceResult<SyntheticVariable> {
        request.validate()?;
        let device = DeviceService::new(self.pool.clone())
            .get_in_org(organization_id, &request.device_id)
            .await?;
        let name = request.name.trim();

        let variable = sqlx::query_as::<_, SyntheticVariable>(
            r#"
            INSERT INTO synthetic_variables (organization_id, device_id, name, expression, unit, description, enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(device.id)
        .bind(name)
        .bind(request.expression.trim())
        .bind(&request.unit)
        .bind(&request.description)
        .bind(request.enabled.unwrap_or(true))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            ServiceError::on_unique_violation(
                e,
                format!("Synthetic variable '{}' already exists for device {}", name, device.external_id),
            )
        })?;

        self.emit(&variable, EventType::SyntheticVariableCreated, "created").await;
        Ok(variable)
    }

    pub async fn update(
        &self,
        organization_id: Uuid,
        id: Uuid,
        request: SyntheticVariableRequest,
    ) -> ServiceResult<SyntheticVariable> {
        request.validate()?;
        self.get(organization_id, id).await?;
        let device = DeviceService::new(self.pool.clone())
            .get_in_org(organization_id, &request.device_id)
            .await?;
        let name = request.name.trim();

        let variable = sqlx::query_as::<_, SyntheticVariable>(
            r#"
            UPDATE synthetic_variables SET
                device_id = $2, name = $3, expression = $4, unit = $5, description = $6,
                enabled = COALESCE($7, enabled), updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(device.id)
        .bind(name)
        .bind(request.expression.trim())
        .bind(&request.unit)
        .bind(&request.description)
        .bind(request.enabled)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            ServiceError::on_unique_violation(
                e,
                format!("Synthetic variable '{}' already exists for device {}", name, device.external_id),
            )
        })?;

        self.emit(&variable, EventType::SyntheticVariableUpdated, "updated").await;
        Ok(variable)
    }

    pub async fn delete(&self, organization_id: Uuid, id: Uuid) -> ServiceResult<()> {
        let variable = self.get(organization_id, id).await?;
        sqlx::query("DELETE FROM synthetic_variables WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.emit(&variable, EventType::SyntheticVariableDeleted, "deleted").await;
        Ok(())
    }

    /// Most recent computed values, newest first
    pub async fn values(&self, organization_id: Uuid, id: Uuid, limit: Option<i64>) -> ServiceResult<Vec<SyntheticVariableValue>> {
        self.get(organization_id, id).await?;
        let values = sqlx::query_as::<_, SyntheticVariableValue>(
            "SELECT * FROM synthetic_variable_values WHERE synthetic_variable_id = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(id)
        .bind(limit.unwrap_or(100).clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;
        Ok(values)
    }

    /// Evaluate every enabled synthetic variable of the record's device.
    ///
    /// Variables are evaluated in creation order, so later expressions can use
    /// earlier results. A failing expression is logged and skipped.
    pub async fn calculate(&self, device: &Device, record: &TelemetryRecord) -> ServiceResult<Vec<SyntheticVariableValue>> {
        let variables = sqlx::query_as::<_, SyntheticVariable>(
            "SELECT * FROM synthetic_variables WHERE device_id = $1 AND enabled = TRUE ORDER BY created_at",
        )
        .bind(device.id)
        .fetch_all(&self.pool)
        .await?;

        if variables.is_empty() {
            return Ok(Vec::new());
        }

        let source = TelemetryStatisticsSource::new(self.pool.clone());
        let context = StatisticsContext {
            device_id: device.id,
            timestamp: record.timestamp,
        };
        let mut scope = numeric_variables(record);
        let mut stored = Vec::with_capacity(variables.len());

        for variable in variables {
            let result = match Expression::parse(&variable.expression) {
                Ok(expression) => evaluate_in_context(&expression, &scope, &source, &context).await,
                Err(e) => Err(e),
            };

            let value = match result {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(
                        "Failed to calculate synthetic variable '{}' for device {}: {}",
                        variable.name,
                        device.external_id,
                        e
                    );
                    continue;
                }
            };

            let saved = sqlx::query_as::<_, SyntheticVariableValue>(
                r#"
                INSERT INTO synthetic_variable_values (synthetic_variable_id, telemetry_record_id, timestamp, value)
                VALUES ($1, $2, $3, $4)
                RETURNING *
                "#,
            )
            .bind(variable.id)
            .bind(record.id)
            .bind(record.timestamp)
            .bind(value)
            .fetch_one(&self.pool)
            .await?;

            tracing::debug!(
                "Synthetic variable '{}' = {} for device {}",
                variable.name,
                value,
                device.external_id
            );
            scope.insert(variable.name, value);
            stored.push(saved);
        }

        Ok(stored)
    }

    async fn emit(&self, variable: &SyntheticVariable, event_type: EventType, verb: &str) {
        EventService::new(self.pool.clone())
            .emit_quietly(
                EventDraft::new(
                    variable.organization_id,
                    event_type,
                    EventSeverity::Info,
                    format!("Synthetic variable {}: {}", verb, variable.name),
                )
                .entity("SYNTHETIC_VARIABLE", variable.id),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_variables_ignore_other_json_types() {
        let record = TelemetryRecord {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            variables: json!({"voltage": 230.5, "current": 2, "label": "x", "flag": true}),
            metadata: None,
            archived: false,
            created_at: Utc::now(),
        };
        let vars = numeric_variables(&record);
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["voltage"], 230.5);
        assert_eq!(vars["current"], 2.0);
    }

    #[test]
    fn request_expression_is_parsed() {
        let request = SyntheticVariableRequest {
            name: "power".into(),
            expression: "voltage * current".into(),
            device_id: "meter-1".into(),
            unit: Some("W".into()),
            description: None,
            enabled: None,
        };
        assert!(request.validate().is_ok());

        let broken = SyntheticVariableRequest {
            expression: "voltage * (current".into(),
            ..request
        };
        assert!(matches!(broken.validate(), Err(ServiceError::Expression(_))));
    }
}
