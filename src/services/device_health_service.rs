use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::{DeviceService, EventDraft, EventService, ServiceResult};
use crate::database::models::Device;
use crate::types::{DeviceStatus, EventSeverity, EventType};

const UPTIME_WEIGHT: f64 = 0.40;
const ALERT_WEIGHT: f64 = 0.30;
const QUALITY_WEIGHT: f64 = 0.20;
const STATUS_WEIGHT: f64 = 0.10;

/// Devices unseen for this long score zero uptime and are marked OFFLINE
pub const OFFLINE_THRESHOLD_MINUTES: i64 = 30;
const FRESH_MINUTES: i64 = 5;
const WARNING_ALERTS: i64 = 2;
const CRITICAL_ALERTS: i64 = 5;
/// One record every five minutes over a day
const EXPECTED_DAILY_RECORDS: f64 = 288.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthComponents {
    pub uptime: f64,
    pub alerts: f64,
    pub data_quality: f64,
    pub status: f64,
}

impl HealthComponents {
    pub fn score(&self) -> i32 {
        let total = self.uptime * UPTIME_WEIGHT
            + self.alerts * ALERT_WEIGHT
            + self.data_quality * QUALITY_WEIGHT
            + self.status * STATUS_WEIGHT;
        total.round() as i32
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub device_id: String,
    pub health_score: i32,
    pub category: &'static str,
    pub components: HealthComponents,
    pub last_health_check_at: DateTime<Utc>,
}

pub fn uptime_score(last_seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(seen) = last_seen_at else {
        return 0.0;
    };
    let minutes = (now - seen).num_minutes();
    if minutes <= FRESH_MINUTES {
        100.0
    } else if minutes >= OFFLINE_THRESHOLD_MINUTES {
        0.0
    } else {
        let span = (OFFLINE_THRESHOLD_MINUTES - FRESH_MINUTES) as f64;
        100.0 - (minutes - FRESH_MINUTES) as f64 / span * 100.0
    }
}

pub fn alert_score(open_alerts: i64) -> f64 {
    match open_alerts {
        n if n <= 0 => 100.0,
        n if n <= WARNING_ALERTS => 80.0,
        n if n <= CRITICAL_ALERTS => 40.0,
        n => (40.0 - (n - CRITICAL_ALERTS) as f64 * 5.0).max(0.0),
    }
}

pub fn quality_score(records_last_day: i64) -> f64 {
    (records_last_day.max(0) as f64 / EXPECTED_DAILY_RECORDS * 100.0).min(100.0)
}

pub fn status_score(status: DeviceStatus) -> f64 {
    match status {
        DeviceStatus::Online => 100.0,
        DeviceStatus::Offline => 0.0,
        DeviceStatus::Unknown => 50.0,
    }
}

pub fn category(score: i32) -> &'static str {
    match score {
        s if s >= 80 => "EXCELLENT",
        s if s >= 60 => "GOOD",
        s if s >= 40 => "FAIR",
        s if s >= 20 => "POOR",
        _ => "CRITICAL",
    }
}

/// True when an ONLINE device has gone quiet long enough to be marked OFFLINE
pub fn has_gone_offline(device: &Device, now: DateTime<Utc>) -> bool {
    if device.status != DeviceStatus::Online {
        return false;
    }
    match device.last_seen_at {
        Some(seen) => now - seen >= Duration::minutes(OFFLINE_THRESHOLD_MINUTES),
        None => true,
    }
}

pub struct DeviceHealthService {
    pool: PgPool,
}

impl DeviceHealthService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn components(&self, device: &Device, now: DateTime<Utc>) -> ServiceResult<HealthComponents> {
        let since = now - Duration::hours(24);
        let (open_alerts, records): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM alerts
                 WHERE device_id = $1 AND acknowledged = FALSE AND created_at >= $2),
                (SELECT COUNT(*) FROM telemetry_records
                 WHERE device_id = $1 AND timestamp >= $2)
            "#,
        )
        .bind(device.id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(HealthComponents {
            uptime: uptime_score(device.last_seen_at, now),
            alerts: alert_score(open_alerts),
            data_quality: quality_score(records),
            status: status_score(device.status),
        })
    }

    /// Score one device and store the result
    pub async fn check(&self, device: &Device) -> ServiceResult<DeviceHealth> {
        let now = Utc::now();
        let components = self.components(device, now).await?;
        let score = components.score();

        sqlx::query("UPDATE devices SET health_score = $2, last_health_check_at = $3 WHERE id = $1")
            .bind(device.id)
            .bind(score)
            .bind(now)
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            "Device {} health score: {} (uptime: {}, alerts: {}, data: {}, status: {})",
            device.external_id,
            score,
            components.uptime,
            components.alerts,
            components.data_quality,
            components.status
        );

        Ok(DeviceHealth {
            device_id: device.external_id.clone(),
            health_score: score,
            category: category(score),
            components,
            last_health_check_at: now,
        })
    }

    pub async fn device_health(&self, organization_id: Uuid, external_id: &str) -> ServiceResult<DeviceHealth> {
        let device = DeviceService::new(self.pool.clone())
            .get_in_org(organization_id, external_id)
            .await?;
        self.check(&device).await
    }

    /// Scheduled pass over every live device. Returns how many were scored.
    pub async fn run(&self) -> ServiceResult<usize> {
        let devices = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE deleted_at IS NULL")
            .fetch_all(&self.pool)
            .await?;

        let now = Utc::now();
        let mut updated = 0;
        for device in &devices {
            let device = if has_gone_offline(device, now) {
                match self.mark_offline(device).await {
                    Ok(device) => device,
                    Err(e) => {
                        tracing::error!("Failed to mark device {} offline: {}", device.external_id, e);
                        device.clone()
                    }
                }
            } else {
                device.clone()
            };

            match self.check(&device).await {
                Ok(_) => updated += 1,
                Err(e) => tracing::error!("Failed to calculate health score for device {}: {}", device.external_id, e),
            }
        }

        tracing::info!("Health score update completed: {} / {} devices updated", updated, devices.len());
        Ok(updated)
    }

    async fn mark_offline(&self, device: &Device) -> ServiceResult<Device> {
        let device = sqlx::query_as::<_, Device>(
            "UPDATE devices SET status = 'OFFLINE', updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(device.id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Device {} marked OFFLINE", device.external_id);
        EventService::new(self.pool.clone())
            .emit_quietly(
                EventDraft::new(
                    device.organization_id,
                    EventType::DeviceOffline,
                    EventSeverity::Warning,
                    format!("Device offline: {}", device.name),
                )
                .entity("DEVICE", device.id)
                .device(&device.external_id)
                .description(format!("No telemetry for {} minutes", OFFLINE_THRESHOLD_MINUTES)),
            )
            .await;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_decays_linearly_between_five_and_thirty_minutes() {
        let now = Utc::now();
        let ago = |m: i64| Some(now - Duration::minutes(m));
        assert_eq!(uptime_score(ago(2), now), 100.0);
        assert_eq!(uptime_score(ago(5), now), 100.0);
        assert_eq!(uptime_score(ago(10), now), 80.0);
        assert_eq!(uptime_score(ago(30), now), 0.0);
        assert_eq!(uptime_score(None, now), 0.0);
    }

    #[test]
    fn alert_bands() {
        assert_eq!(alert_score(0), 100.0);
        assert_eq!(alert_score(2), 80.0);
        assert_eq!(alert_score(5), 40.0);
        assert_eq!(alert_score(7), 30.0);
        assert_eq!(alert_score(50), 0.0);
    }

    #[test]
    fn quality_caps_at_one_hundred() {
        assert_eq!(quality_score(0), 0.0);
        assert_eq!(quality_score(144), 50.0);
        assert_eq!(quality_score(1000), 100.0);
    }

    #[test]
    fn weighted_score_and_category() {
        let healthy = HealthComponents {
            uptime: 100.0,
            alerts: 100.0,
            data_quality: 100.0,
            status: 100.0,
        };
        assert_eq!(healthy.score(), 100);
        assert_eq!(category(healthy.score()), "EXCELLENT");

        let degraded = HealthComponents {
            uptime: 80.0,
            alerts: 40.0,
            data_quality: 50.0,
            status: 50.0,
        };
        // 32 + 12 + 10 + 5
        assert_eq!(degraded.score(), 59);
        assert_eq!(category(degraded.score()), "FAIR");
        assert_eq!(category(60), "GOOD");
        assert_eq!(category(20), "POOR");
        assert_eq!(category(19), "CRITICAL");
    }

    #[test]
    fn only_quiet_online_devices_go_offline() {
        let now = Utc::now();
        let quiet = crate::testing::device("pump-1", DeviceStatus::Online, Some(now - Duration::minutes(31)));
        assert!(has_gone_offline(&quiet, now));

        let fresh = crate::testing::device("pump-2", DeviceStatus::Online, Some(now - Duration::minutes(3)));
        assert!(!has_gone_offline(&fresh, now));

        let never_seen = crate::testing::device("pump-3", DeviceStatus::Online, None);
        assert!(has_gone_offline(&never_seen, now));

        let already = crate::testing::device("pump-4", DeviceStatus::Offline, None);
        assert!(!has_gone_offline(&already, now));
    }
}
