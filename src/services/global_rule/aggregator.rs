//! Fleet-wide aggregation over the devices a global rule selects.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::GlobalRule;
use crate::expression::functions::round_half_up;
use crate::services::ServiceResult;
use crate::types::{AggregationFunction, SelectorType};

/// Devices seen within this many minutes count as online
pub const ONLINE_THRESHOLD_MINUTES: i64 = 5;
pub const DEFAULT_PERCENTILE: f64 = 95.0;

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct FleetDevice {
    pub id: Uuid,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub value: f64,
    pub device_count: i64,
    pub affected_devices: Vec<Uuid>,
}

impl AggregationResult {
    pub fn empty() -> Self {
        Self {
            value: 0.0,
            device_count: 0,
            affected_devices: Vec::new(),
        }
    }
}

pub fn is_online(device: &FleetDevice, now: DateTime<Utc>) -> bool {
    let threshold = now - Duration::minutes(ONLINE_THRESHOLD_MINUTES);
    matches!(device.last_seen_at, Some(seen) if seen > threshold)
}

/// Aggregate over connectivity only
pub fn aggregate_status(function: AggregationFunction, devices: &[FleetDevice], now: DateTime<Utc>) -> AggregationResult {
    let total = devices.len() as i64;
    if total == 0 {
        return AggregationResult::empty();
    }

    let (online, offline): (Vec<&FleetDevice>, Vec<&FleetDevice>) = devices.iter().partition(|d| is_online(d, now));
    let ids = |set: &[&FleetDevice]| set.iter().map(|d| d.id).collect::<Vec<Uuid>>();
    let percent = |count: usize| round_half_up(count as f64 * 100.0 / total as f64, 2);

    let (value, affected) = match function {
        AggregationFunction::CountOnline => (online.len() as f64, ids(&online)),
        AggregationFunction::CountOffline => (offline.len() as f64, ids(&offline)),
        AggregationFunction::PercentOnline => (percent(online.len()), ids(&online)),
        AggregationFunction::PercentOffline => (percent(offline.len()), ids(&offline)),
        _ => (total as f64, devices.iter().map(|d| d.id).collect()),
    };

    AggregationResult {
        value,
        device_count: total,
        affected_devices: affected,
    }
}

/// Aggregate each device's latest value of the rule's variable.
///
/// `latest` holds one entry per selected device that has reported the variable.
pub fn aggregate_metric(
    function: AggregationFunction,
    latest: &BTreeMap<Uuid, f64>,
    device_count: i64,
    percentile: f64,
) -> AggregationResult {
    let values: Vec<f64> = latest.values().copied().collect();
    let affected: Vec<Uuid> = latest.keys().copied().collect();
    let n = values.len();

    let value = if n == 0 {
        0.0
    } else {
        match function {
            AggregationFunction::Sum => values.iter().sum(),
            AggregationFunction::Avg => round_half_up(values.iter().sum::<f64>() / n as f64, 6),
            AggregationFunction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggregationFunction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregationFunction::Stddev => population_stddev(&values),
            AggregationFunction::Percentile => nearest_rank(&values, percentile),
            _ => 0.0,
        }
    };

    AggregationResult {
        value,
        device_count,
        affected_devices: affected,
    }
}

fn population_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    round_half_up(variance.sqrt(), 6)
}

fn nearest_rank(values: &[f64], percentile: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (percentile / 100.0 * sorted.len() as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, sorted.len() as i64 - 1) as usize;
    sorted[index]
}

/// `aggregation_params.percentile`, defaulting to the 95th
pub fn percentile_param(params: Option<&serde_json::Value>) -> f64 {
    params
        .and_then(|p| p.get("percentile"))
        .and_then(|p| p.as_f64())
        .unwrap_or(DEFAULT_PERCENTILE)
}

/// External ids listed in a DEVICE_LIST selector
pub fn parse_device_list(selector: &str) -> Vec<String> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub struct FleetAggregator {
    pool: PgPool,
}

impl FleetAggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Active devices picked by the rule's selector
    pub async fn select_devices(&self, rule: &GlobalRule) -> ServiceResult<Vec<FleetDevice>> {
        let selector = rule.selector_value.as_deref().unwrap_or("").trim();
        let base = "SELECT d.id, d.last_seen_at FROM devices d \
                    WHERE d.organization_id = $1 AND d.active = TRUE AND d.deleted_at IS NULL";

        let devices = match rule.selector_type {
            SelectorType::Organization => {
                sqlx::query_as::<_, FleetDevice>(base)
                    .bind(rule.organization_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            SelectorType::Tag => {
                if selector.is_empty() {
                    tracing::warn!("Global rule {} has an empty tag selector", rule.id);
                    return Ok(Vec::new());
                }
                let sql = format!(
                    "{} AND EXISTS (SELECT 1 FROM device_tags t WHERE t.device_id = d.id AND t.tag = $2)",
                    base
                );
                sqlx::query_as::<_, FleetDevice>(&sql)
                    .bind(rule.organization_id)
                    .bind(selector)
                    .fetch_all(&self.pool)
                    .await?
            }
            SelectorType::DeviceList => {
                let external_ids = parse_device_list(selector);
                if external_ids.is_empty() {
                    return Ok(Vec::new());
                }
                let sql = format!("{} AND d.external_id = ANY($2)", base);
                sqlx::query_as::<_, FleetDevice>(&sql)
                    .bind(rule.organization_id)
                    .bind(&external_ids)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(devices)
    }

    async fn latest_values(&self, device_ids: &[Uuid], variable: &str) -> ServiceResult<BTreeMap<Uuid, f64>> {
        let rows: Vec<(Uuid, f64)> = sqlx::query_as(
            r#"
            SELECT device_id, last_value FROM variables
            WHERE device_id = ANY($1) AND name = $2 AND last_value IS NOT NULL
            "#,
        )
        .bind(device_ids)
        .bind(variable)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn alerting_devices(&self, device_ids: &[Uuid]) -> ServiceResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT device_id FROM alerts WHERE device_id = ANY($1) AND acknowledged = FALSE",
        )
        .bind(device_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn aggregate(&self, rule: &GlobalRule) -> ServiceResult<AggregationResult> {
        let devices = self.select_devices(rule).await?;
        if devices.is_empty() {
            return Ok(AggregationResult::empty());
        }

        let ids: Vec<Uuid> = devices.iter().map(|d| d.id).collect();
        let function = rule.aggregation_function;

        if function == AggregationFunction::CountAlerting {
            let alerting = self.alerting_devices(&ids).await?;
            return Ok(AggregationResult {
                value: alerting.len() as f64,
                device_count: devices.len() as i64,
                affected_devices: alerting,
            });
        }

        if !function.requires_variable() {
            return Ok(aggregate_status(function, &devices, Utc::now()));
        }

        let variable = rule.aggregation_variable.as_deref().unwrap_or("").trim();
        let latest = self.latest_values(&ids, variable).await?;
        Ok(aggregate_metric(
            function,
            &latest,
            devices.len() as i64,
            percentile_param(rule.aggregation_params.as_ref()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device(minutes_ago: Option<i64>, now: DateTime<Utc>) -> FleetDevice {
        FleetDevice {
            id: Uuid::new_v4(),
            last_seen_at: minutes_ago.map(|m| now - Duration::minutes(m)),
        }
    }

    #[test]
    fn online_means_seen_within_five_minutes() {
        let now = Utc::now();
        assert!(is_online(&device(Some(1), now), now));
        assert!(!is_online(&device(Some(6), now), now));
        assert!(!is_online(&device(None, now), now));
    }

    #[test]
    fn status_counts_and_percentages() {
        let now = Utc::now();
        let fleet = vec![device(Some(1), now), device(Some(2), now), device(Some(60), now)];

        let online = aggregate_status(AggregationFunction::CountOnline, &fleet, now);
        assert_eq!(online.value, 2.0);
        assert_eq!(online.device_count, 3);
        assert_eq!(online.affected_devices.len(), 2);

        assert_eq!(aggregate_status(AggregationFunction::CountOffline, &fleet, now).value, 1.0);
        assert_eq!(aggregate_status(AggregationFunction::CountDevices, &fleet, now).value, 3.0);
        assert_eq!(aggregate_status(AggregationFunction::PercentOnline, &fleet, now).value, 66.67);
        assert_eq!(aggregate_status(AggregationFunction::PercentOffline, &fleet, now).value, 33.33);
    }

    #[test]
    fn empty_fleet_aggregates_to_zero() {
        let result = aggregate_status(AggregationFunction::PercentOnline, &[], Utc::now());
        assert_eq!(result, AggregationResult::empty());
    }

    fn latest(values: &[f64]) -> BTreeMap<Uuid, f64> {
        values.iter().map(|v| (Uuid::new_v4(), *v)).collect()
    }

    #[test]
    fn metric_aggregations() {
        let values = latest(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(aggregate_metric(AggregationFunction::Sum, &values, 5, 95.0).value, 100.0);
        assert_eq!(aggregate_metric(AggregationFunction::Avg, &values, 5, 95.0).value, 25.0);
        assert_eq!(aggregate_metric(AggregationFunction::Min, &values, 5, 95.0).value, 10.0);
        assert_eq!(aggregate_metric(AggregationFunction::Max, &values, 5, 95.0).value, 40.0);

        let result = aggregate_metric(AggregationFunction::Avg, &values, 5, 95.0);
        assert_eq!(result.device_count, 5);
        assert_eq!(result.affected_devices.len(), 4);
    }

    #[test]
    fn stddev_is_population_and_needs_two_values() {
        let values = latest(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(aggregate_metric(AggregationFunction::Stddev, &values, 8, 95.0).value, 2.0);
        assert_eq!(aggregate_metric(AggregationFunction::Stddev, &latest(&[3.0]), 1, 95.0).value, 0.0);
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let values = latest(&[15.0, 20.0, 35.0, 40.0, 50.0]);
        assert_eq!(aggregate_metric(AggregationFunction::Percentile, &values, 5, 40.0).value, 20.0);
        assert_eq!(aggregate_metric(AggregationFunction::Percentile, &values, 5, 95.0).value, 50.0);
        assert_eq!(aggregate_metric(AggregationFunction::Percentile, &values, 5, 0.0).value, 15.0);
    }

    #[test]
    fn no_reported_values_give_zero() {
        let result = aggregate_metric(AggregationFunction::Max, &BTreeMap::new(), 3, 95.0);
        assert_eq!(result.value, 0.0);
        assert_eq!(result.device_count, 3);
    }

    #[test]
    fn params_and_selectors() {
        assert_eq!(percentile_param(Some(&json!({"percentile": 50}))), 50.0);
        assert_eq!(percentile_param(Some(&json!({}))), 95.0);
        assert_eq!(percentile_param(None), 95.0);
        assert_eq!(parse_device_list(" a, b ,,c "), vec!["a", "b", "c"]);
    }
}
