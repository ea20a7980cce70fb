//! Per-organization telemetry retention: delete or archive records past their age.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{EventDraft, EventService, ServiceError, ServiceResult};
use crate::config::config;
use crate::database::models::{DataArchiveExecution, DataRetentionPolicy, TelemetryRecord};
use crate::types::{ArchiveStatus, EventSeverity, EventType};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicyRequest {
    pub retention_days: i32,
    pub enabled: Option<bool>,
    pub archive_enabled: Option<bool>,
    pub archive_path: Option<String>,
}

/// A century
const MAX_RETENTION_DAYS: i32 = 36_500;

impl RetentionPolicyRequest {
    fn validate(&self) -> ServiceResult<()> {
        if self.retention_days <= 0 {
            return Err(ServiceError::bad_request("Retention days must be positive"));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(ServiceError::bad_request(format!(
                "Retention days cannot exceed {}",
                MAX_RETENTION_DAYS
            )));
        }
        Ok(())
    }
}

/// What one run did with the expired records
#[derive(Debug, Default)]
struct RunOutcome {
    records: i64,
    archive_from: Option<DateTime<Utc>>,
    file_path: Option<String>,
    size_bytes: i64,
    checksum: Option<String>,
}

/// `<base>/<org>/<cutoff-date>.jsonl`
pub fn archive_file_path(base: &Path, organization_id: Uuid, cutoff: DateTime<Utc>) -> PathBuf {
    base.join(organization_id.to_string())
        .join(format!("{}.jsonl", cutoff.format("%Y-%m-%d")))
}

/// One JSON document per line, newline terminated
pub fn encode_json_lines(records: &[TelemetryRecord]) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Write the archive, creating parent directories. Returns the file size.
pub async fn write_archive(path: &Path, contents: &[u8]) -> std::io::Result<u64> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    Ok(tokio::fs::metadata(path).await?.len())
}

pub struct DataRetentionService {
    pool: PgPool,
}

impl DataRetentionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_policy(&self, organization_id: Uuid) -> ServiceResult<DataRetentionPolicy> {
        sqlx::query_as::<_, DataRetentionPolicy>("SELECT * FROM data_retention_policies WHERE organization_id = $1")
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Retention policy not found for organization: {}", organization_id)))
    }

    pub async fn upsert_policy(&self, organization_id: Uuid, request: RetentionPolicyRequest) -> ServiceResult<DataRetentionPolicy> {
        request.validate()?;
        let policy = sqlx::query_as::<_, DataRetentionPolicy>(
            r#"
            INSERT INTO data_retention_policies (organization_id, retention_days, enabled, archive_enabled, archive_path)
            VALUES ($1, $2, COALESCE($3, TRUE), COALESCE($4, FALSE), $5)
            ON CONFLICT (organization_id) DO UPDATE SET
                retention_days = EXCLUDED.retention_days,
                enabled = COALESCE($3, data_retention_policies.enabled),
                archive_enabled = COALESCE($4, data_retention_policies.archive_enabled),
                archive_path = COALESCE($5, data_retention_policies.archive_path),
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(request.retention_days)
        .bind(request.enabled)
        .bind(request.archive_enabled)
        .bind(&request.archive_path)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            "Retention policy for organization {} set to {} days (archive: {})",
            organization_id,
            policy.retention_days,
            policy.archive_enabled
        );
        Ok(policy)
    }

    pub async fn executions(&self, organization_id: Uuid, limit: Option<i64>) -> ServiceResult<Vec<DataArchiveExecution>> {
        let executions = sqlx::query_as::<_, DataArchiveExecution>(
            "SELECT * FROM data_archive_executions WHERE organization_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(organization_id)
        .bind(limit.unwrap_or(50).clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        Ok(executions)
    }

    /// Run the organization's policy immediately
    pub async fn execute_now(&self, organization_id: Uuid) -> ServiceResult<DataArchiveExecution> {
        let policy = self.get_policy(organization_id).await?;
        self.execute(&policy).await
    }

    /// Run every enabled policy; returns how many executions succeeded
    pub async fn execute_all(&self) -> ServiceResult<usize> {
        let policies = sqlx::query_as::<_, DataRetentionPolicy>("SELECT * FROM data_retention_policies WHERE enabled = TRUE")
            .fetch_all(&self.pool)
            .await?;

        tracing::info!("Executing retention for {} enabled policies", policies.len());
        let mut succeeded = 0;
        for policy in &policies {
            match self.execute(policy).await {
                Ok(execution) if execution.status == ArchiveStatus::Success => succeeded += 1,
                Ok(_) => {}
                Err(e) => tracing::error!("Failed to execute retention policy {}: {}", policy.id, e),
            }
        }
        Ok(succeeded)
    }

    /// Apply one policy. Failures while archiving are recorded on the execution,
    /// not returned.
    pub async fn execute(&self, policy: &DataRetentionPolicy) -> ServiceResult<DataArchiveExecution> {
        tracing::info!(
            "Starting retention run for organization {} (policy {})",
            policy.organization_id,
            policy.id
        );
        let days = i64::from(policy.retention_days.clamp(1, MAX_RETENTION_DAYS));
        let cutoff = Utc::now() - Duration::days(days);

        let execution = sqlx::query_as::<_, DataArchiveExecution>(
            r#"
            INSERT INTO data_archive_executions (policy_id, organization_id, status, archive_to_date)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(policy.id)
        .bind(policy.organization_id)
        .bind(ArchiveStatus::Running)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;

        match self.run(policy, cutoff).await {
            Ok(outcome) => self.finish_success(policy, execution.id, outcome).await,
            Err(e) => {
                tracing::error!("Retention run failed for policy {}: {}", policy.id, e);
                self.finish_failure(policy, execution.id, &e.to_string()).await
            }
        }
    }

    async fn run(&self, policy: &DataRetentionPolicy, cutoff: DateTime<Utc>) -> ServiceResult<RunOutcome> {
        let records = sqlx::query_as::<_, TelemetryRecord>(
            r#"
            SELECT * FROM telemetry_records
            WHERE organization_id = $1 AND timestamp < $2 AND archived = FALSE
            ORDER BY timestamp
            "#,
        )
        .bind(policy.organization_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(
            "Found {} records past retention for organization {}",
            records.len(),
            policy.organization_id
        );
        if records.is_empty() {
            return Ok(RunOutcome::default());
        }

        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        let archive_from = records.first().map(|r| r.timestamp);

        if !policy.archive_enabled {
            let deleted = sqlx::query("DELETE FROM telemetry_records WHERE id = ANY($1)")
                .bind(&ids)
                .execute(&self.pool)
                .await?
                .rows_affected();
            return Ok(RunOutcome {
                records: deleted as i64,
                archive_from,
                ..RunOutcome::default()
            });
        }

        let base = policy
            .archive_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| config().retention.archive_dir.clone());
        let path = archive_file_path(Path::new(&base), policy.organization_id, cutoff);

        let contents = encode_json_lines(&records).map_err(std::io::Error::from)?;
        let size = write_archive(&path, &contents).await?;
        let checksum = sha256_hex(&contents);

        sqlx::query("UPDATE telemetry_records SET archived = TRUE WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await?;

        tracing::info!(
            "Archived {} records ({} bytes) to {}",
            records.len(),
            size,
            path.display()
        );
        Ok(RunOutcome {
            records: records.len() as i64,
            archive_from,
            file_path: Some(path.display().to_string()),
            size_bytes: size as i64,
            checksum: Some(checksum),
        })
    }

    async fn finish_success(
        &self,
        policy: &DataRetentionPolicy,
        execution_id: Uuid,
        outcome: RunOutcome,
    ) -> ServiceResult<DataArchiveExecution> {
        let archived = if outcome.file_path.is_some() { outcome.records } else { 0 };

        sqlx::query(
            r#"
            UPDATE data_retention_policies SET
                last_archive_run = now(), last_archive_status = $2, last_archive_error = NULL,
                total_records_archived = total_records_archived + $3,
                total_archive_size_bytes = total_archive_size_bytes + $4,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(policy.id)
        .bind(ArchiveStatus::Success)
        .bind(archived)
        .bind(outcome.size_bytes)
        .execute(&self.pool)
        .await?;

        let execution = sqlx::query_as::<_, DataArchiveExecution>(
            r#"
            UPDATE data_archive_executions SET
                status = $2, completed_at = now(), archive_from_date = $3, records_archived = $4,
                archive_file_path = $5, archive_size_bytes = $6, archive_checksum = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(execution_id)
        .bind(ArchiveStatus::Success)
        .bind(outcome.archive_from)
        .bind(outcome.records)
        .bind(&outcome.file_path)
        .bind(outcome.size_bytes)
        .bind(&outcome.checksum)
        .fetch_one(&self.pool)
        .await?;
        Ok(execution)
    }

    async fn finish_failure(
        &self,
        policy: &DataRetentionPolicy,
        execution_id: Uuid,
        message: &str,
    ) -> ServiceResult<DataArchiveExecution> {
        sqlx::query(
            r#"
            UPDATE data_retention_policies SET
                last_archive_run = now(), last_archive_status = $2, last_archive_error = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(policy.id)
        .bind(ArchiveStatus::Failed)
        .bind(message)
        .execute(&self.pool)
        .await?;

        EventService::new(self.pool.clone())
            .emit_quietly(
                EventDraft::new(
                    policy.organization_id,
                    EventType::SystemError,
                    EventSeverity::Error,
                    "Data retention run failed",
                )
                .entity("RETENTION_POLICY", policy.id)
                .description(message.to_string()),
            )
            .await;

        let execution = sqlx::query_as::<_, DataArchiveExecution>(
            r#"
            UPDATE data_archive_executions SET status = $2, completed_at = now(), error_message = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(execution_id)
        .bind(ArchiveStatus::Failed)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: f64) -> TelemetryRecord {
        TelemetryRecord {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            variables: json!({"temperature": value}),
            metadata: None,
            archived: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn archive_path_layout() {
        let org = Uuid::nil();
        let cutoff = DateTime::parse_from_rfc3339("2024-03-09T17:45:00Z").unwrap().with_timezone(&Utc);
        let path = archive_file_path(Path::new("/data/archives"), org, cutoff);
        assert_eq!(
            path,
            PathBuf::from("/data/archives/00000000-0000-0000-0000-000000000000/2024-03-09.jsonl")
        );
    }

    #[test]
    fn json_lines_has_one_record_per_line() {
        let encoded = encode_json_lines(&[record(1.0), record(2.0)]).unwrap();
        let text = String::from_utf8(encoded).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["variables"]["temperature"], 1.0);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn checksum_is_hex_sha256() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn archive_is_written_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("org").join("2024-01-01.jsonl");
        let size = write_archive(&path, b"{\"a\":1}\n").await.unwrap();
        assert_eq!(size, 8);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}\n");
    }

    #[test]
    fn retention_days_must_be_positive() {
        let request = RetentionPolicyRequest {
            retention_days: 0,
            enabled: None,
            archive_enabled: None,
            archive_path: None,
        };
        assert!(matches!(request.validate(), Err(ServiceError::BadRequest(_))));
    }

    #[test]
    fn retention_days_are_capped() {
        let request = RetentionPolicyRequest {
            retention_days: i32::MAX,
            enabled: None,
            archive_enabled: None,
            archive_path: None,
        };
        let err = request.validate().unwrap_err();
        assert_eq!(err.to_string(), "Retention days cannot exceed 36500");
    }
}
