use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::ArchiveStatus;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataRetentionPolicy {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub retention_days: i32,
    pub enabled: bool,
    pub archive_enabled: bool,
    pub archive_path: Option<String>,
    pub last_archive_run: Option<DateTime<Utc>>,
    pub last_archive_status: Option<ArchiveStatus>,
    pub last_archive_error: Option<String>,
    pub total_records_archived: i64,
    pub total_archive_size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataArchiveExecution {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub organization_id: Uuid,
    pub status: ArchiveStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archive_from_date: Option<DateTime<Utc>>,
    pub archive_to_date: Option<DateTime<Utc>>,
    pub records_archived: i64,
    pub archive_file_path: Option<String>,
    pub archive_size_bytes: i64,
    pub archive_checksum: Option<String>,
    pub error_message: Option<String>,
}
