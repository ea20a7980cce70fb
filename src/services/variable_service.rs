use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::{DeviceService, ServiceError, ServiceResult};
use crate::database::models::{Device, Variable, VariableValue};
use crate::types::DataType;

const DEFAULT_HISTORY_LIMIT: i64 = 1000;
const MAX_HISTORY_LIMIT: i64 = 10_000;

/// Display name for an auto-created variable.
///
/// `kw_consumption` becomes `Kw Consumption`, `powerFactor` becomes `Power Factor`.
pub fn humanize(name: &str) -> String {
    let mut spaced = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        let c = if c == '_' { ' ' } else { c };
        if let Some(p) = prev {
            if p.is_ascii_lowercase() && c.is_ascii_uppercase() {
                spaced.push(' ');
            }
        }
        spaced.push(c);
        prev = Some(c);
    }

    spaced
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestValue {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VariableStatistics {
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub sum: Option<f64>,
    pub count: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableRequest {
    pub name: String,
    /// External id of the owning device; absent for organization templates
    pub device_id: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub data_type: Option<DataType>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub decimal_places: Option<i32>,
}

impl VariableRequest {
    fn validate(&self) -> ServiceResult<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::bad_request("Variable name is required"));
        }
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(ServiceError::bad_request("minValue must not exceed maxValue"));
            }
        }
        if matches!(self.decimal_places, Some(p) if !(0..=10).contains(&p)) {
            return Err(ServiceError::bad_request("decimalPlaces must be between 0 and 10"));
        }
        Ok(())
    }
}

fn clamp_history_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT)
}

pub struct VariableService {
    pool: PgPool,
}

impl VariableService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_for_device(&self, device_id: Uuid, name: &str) -> ServiceResult<Option<Variable>> {
        let variable = sqlx::query_as::<_, Variable>("SELECT * FROM variables WHERE device_id = $1 AND name = $2")
            .bind(device_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(variable)
    }

    /// The device's variable called `name`, auto-created on first sight
    pub async fn get_or_create_variable(&self, device: &Device, name: &str) -> ServiceResult<Variable> {
        if let Some(variable) = self.find_for_device(device.id, name).await? {
            return Ok(variable);
        }

        let created = sqlx::query_as::<_, Variable>(
            r#"
            INSERT INTO variables
                (organization_id, device_id, name, display_name, data_type, data_source, decimal_places)
            VALUES ($1, $2, $3, $4, 'NUMBER', 'AUTO', 2)
            RETURNING *
            "#,
        )
        .bind(device.organization_id)
        .bind(device.id)
        .bind(name)
        .bind(humanize(name))
        .fetch_one(&self.pool)
        .await;

        match created {
            Ok(variable) => {
                tracing::info!("Auto-provisioned variable '{}' for device '{}'", name, device.external_id);
                Ok(variable)
            }
            Err(e) if super::is_unique_violation(&e) => {
                tracing::debug!("Variable '{}' for device '{}' was created concurrently", name, device.external_id);
                self.find_for_device(device.id, name)
                    .await?
                    .ok_or_else(|| ServiceError::conflict(format!("Variable '{}' is unavailable", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store one reading and advance the variable's cached last value when newer
    pub async fn record_value(
        &self,
        device: &Device,
        name: &str,
        value: f64,
        timestamp: DateTime<Utc>,
        telemetry_record_id: Option<Uuid>,
    ) -> ServiceResult<VariableValue> {
        let variable = self.get_or_create_variable(device, name).await?;

        let stored = sqlx::query_as::<_, VariableValue>(
            r#"
            INSERT INTO variable_values (variable_id, telemetry_record_id, timestamp, value)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(variable.id)
        .bind(telemetry_record_id)
        .bind(timestamp)
        .bind(value)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            r#"
            UPDATE variables SET last_value = $2, last_value_at = $3, updated_at = now()
            WHERE id = $1 AND (last_value_at IS NULL OR last_value_at < $3)
            "#,
        )
        .bind(variable.id)
        .bind(value)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    /// Record every value of a telemetry payload. Returns how many were stored.
    pub async fn process_telemetry(
        &self,
        device: &Device,
        variables: &BTreeMap<String, f64>,
        timestamp: DateTime<Utc>,
        telemetry_record_id: Option<Uuid>,
    ) -> ServiceResult<usize> {
        for (name, value) in variables {
            self.record_value(device, name, *value, timestamp, telemetry_record_id)
                .await?;
        }
        tracing::debug!("Processed {} variables for device '{}'", variables.len(), device.external_id);
        Ok(variables.len())
    }

    pub async fn device_variables(&self, device_id: Uuid) -> ServiceResult<Vec<Variable>> {
        let variables = sqlx::query_as::<_, Variable>("SELECT * FROM variables WHERE device_id = $1 ORDER BY name")
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(variables)
    }

    pub async fn latest_values(&self, device_id: Uuid) -> ServiceResult<BTreeMap<String, LatestValue>> {
        Ok(self
            .device_variables(device_id)
            .await?
            .into_iter()
            .filter_map(|v| match (v.last_value, v.last_value_at) {
                (Some(value), Some(timestamp)) => Some((v.name, LatestValue { value, timestamp })),
                _ => None,
            })
            .collect())
    }

    /// Values within `[from, to]`, oldest first
    pub async fn history(
        &self,
        organization_id: Uuid,
        variable_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: Option<i64>,
    ) -> ServiceResult<Vec<VariableValue>> {
        self.get(organization_id, variable_id).await?;
        let values = sqlx::query_as::<_, VariableValue>(
            r#"
            SELECT * FROM variable_values
            WHERE variable_id = $1 AND timestamp BETWEEN $2 AND $3
            ORDER BY timestamp
            LIMIT $4
            "#,
        )
        .bind(variable_id)
        .bind(from)
        .bind(to)
        .bind(clamp_history_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(values)
    }

    pub async fn statistics(
        &self,
        organization_id: Uuid,
        variable_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ServiceResult<VariableStatistics> {
        self.get(organization_id, variable_id).await?;
        let stats = sqlx::query_as::<_, VariableStatistics>(
            r#"
            SELECT AVG(value) AS avg, MIN(value) AS min, MAX(value) AS max,
                   SUM(value) AS sum, COUNT(*) AS count
            FROM variable_values
            WHERE variable_id = $1 AND timestamp BETWEEN $2 AND $3
            "#,
        )
        .bind(variable_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }

    pub async fn list(&self, organization_id: Uuid, device_id: Option<Uuid>) -> ServiceResult<Vec<Variable>> {
        let variables = sqlx::query_as::<_, Variable>(
            r#"
            SELECT * FROM variables
            WHERE organization_id = $1 AND ($2::uuid IS NULL OR device_id = $2)
            ORDER BY name
            "#,
        )
        .bind(organization_id)
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(variables)
    }

    /// Organization-wide variable definitions not bound to a device
    pub async fn list_templates(&self, organization_id: Uuid) -> ServiceResult<Vec<Variable>> {
        let variables = sqlx::query_as::<_, Variable>(
            "SELECT * FROM variables WHERE organization_id = $1 AND device_id IS NULL ORDER BY name",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(variables)
    }

    pub async fn get(&self, organization_id: Uuid, variable_id: Uuid) -> ServiceResult<Variable> {
        sqlx::query_as::<_, Variable>("SELECT * FROM variables WHERE id = $1 AND organization_id = $2")
            .bind(variable_id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Variable not found: {}", variable_id)))
    }

    async fn resolve_device(&self, organization_id: Uuid, external_id: Option<&str>) -> ServiceResult<Option<Uuid>> {
        match external_id {
            Some(external_id) => {
                let device = DeviceService::new(self.pool.clone())
                    .get_in_org(organization_id, external_id)
                    .await?;
                Ok(Some(device.id))
            }
            None => Ok(None),
        }
    }

    pub async fn create(&self, organization_id: Uuid, request: VariableRequest) -> ServiceResult<Variable> {
        request.validate()?;
        let device_id = self.resolve_device(organization_id, request.device_id.as_deref()).await?;
        let name = request.name.trim();

        let variable = sqlx::query_as::<_, Variable>(
            r#"
            INSERT INTO variables
                (organization_id, device_id, name, display_name, description, unit, data_type,
                 icon, color, min_value, max_value, decimal_places, data_source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'MANUAL')
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(device_id)
        .bind(name)
        .bind(request.display_name.clone().unwrap_or_else(|| humanize(name)))
        .bind(&request.description)
        .bind(&request.unit)
        .bind(request.data_type.unwrap_or(DataType::Number))
        .bind(&request.icon)
        .bind(&request.color)
        .bind(request.min_value)
        .bind(request.max_value)
        .bind(request.decimal_places.unwrap_or(2))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServiceError::on_unique_violation(e, format!("Variable with name '{}' already exists", name)))?;

        tracing::info!("Created variable '{}' for organization {}", variable.name, organization_id);
        Ok(variable)
    }

    pub async fn update(&self, organization_id: Uuid, variable_id: Uuid, request: VariableRequest) -> ServiceResult<Variable> {
        request.validate()?;
        let existing = self.get(organization_id, variable_id).await?;
        let name = request.name.trim();

        if existing.is_system_variable && existing.name != name {
            return Err(ServiceError::bad_request("Cannot change name of system variable"));
        }

        let variable = sqlx::query_as::<_, Variable>(
            r#"
            UPDATE variables SET
                name = $2, display_name = $3, description = $4, unit = $5,
                data_type = $6, icon = $7, color = $8, min_value = $9, max_value = $10,
                decimal_places = $11, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(variable_id)
        .bind(name)
        .bind(request.display_name.clone().or(existing.display_name))
        .bind(&request.description)
        .bind(&request.unit)
        .bind(request.data_type.unwrap_or(existing.data_type))
        .bind(&request.icon)
        .bind(&request.color)
        .bind(request.min_value)
        .bind(request.max_value)
        .bind(request.decimal_places.unwrap_or(existing.decimal_places))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServiceError::on_unique_violation(e, format!("Variable with name '{}' already exists", name)))?;

        tracing::info!("Updated variable {}", variable_id);
        Ok(variable)
    }

    pub async fn delete(&self, organization_id: Uuid, variable_id: Uuid) -> ServiceResult<()> {
        let variable = self.get(organization_id, variable_id).await?;
        if variable.is_system_variable {
            return Err(ServiceError::bad_request("Cannot delete system variable"));
        }

        sqlx::query("DELETE FROM variables WHERE id = $1")
            .bind(variable_id)
            .execute(&self.pool)
            .await?;
        tracing::info!("Deleted variable '{}' ({})", variable.name, variable_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanizes_snake_and_camel_case() {
        assert_eq!(humanize("kw_consumption"), "Kw Consumption");
        assert_eq!(humanize("powerFactor"), "Power Factor");
        assert_eq!(humanize("temperature"), "Temperature");
        assert_eq!(humanize("HVAC_state"), "Hvac State");
        assert_eq!(humanize("__x__"), "X");
    }

    #[test]
    fn request_validation() {
        let request = VariableRequest {
            name: "voltage".into(),
            device_id: None,
            display_name: None,
            description: None,
            unit: Some("V".into()),
            data_type: None,
            icon: None,
            color: None,
            min_value: Some(10.0),
            max_value: Some(1.0),
            decimal_places: None,
        };
        assert!(request.validate().is_err());

        let ok = VariableRequest {
            max_value: Some(250.0),
            ..request.clone()
        };
        assert!(ok.validate().is_ok());

        let blank = VariableRequest {
            name: " ".into(),
            ..ok
        };
        assert_eq!(blank.validate().unwrap_err().to_string(), "Variable name is required");
    }

    #[test]
    fn history_limit_is_bounded() {
        assert_eq!(clamp_history_limit(None), 1000);
        assert_eq!(clamp_history_limit(Some(-4)), 1);
        assert_eq!(clamp_history_limit(Some(1_000_000)), 10_000);
    }
}
