use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::EntityType;

/// Record of a soft-deleted entity, restorable until `expires_at`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrashLog {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_name: String,
    pub snapshot: serde_json::Value,
    pub organization_id: Option<Uuid>,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: Option<String>,
    pub deletion_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub restored_at: Option<DateTime<Utc>>,
    pub restored_by: Option<String>,
    pub permanently_deleted_at: Option<DateTime<Utc>>,
}

impl TrashLog {
    pub fn expiry_for(deleted_at: DateTime<Utc>, retention_days: i64) -> DateTime<Utc> {
        deleted_at + Duration::days(retention_days)
    }

    pub fn can_restore_at(&self, now: DateTime<Utc>) -> bool {
        self.restored_at.is_none() && self.permanently_deleted_at.is_none() && self.expires_at > now
    }

    pub fn can_restore(&self) -> bool {
        self.can_restore_at(Utc::now())
    }

    /// Whole days left before the item is purged, never negative
    pub fn days_remaining_at(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_days().max(0)
    }

    pub fn days_remaining(&self) -> i64 {
        self.days_remaining_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(deleted_at: DateTime<Utc>) -> TrashLog {
        TrashLog {
            id: Uuid::new_v4(),
            entity_type: EntityType::Device,
            entity_id: Uuid::new_v4().to_string(),
            entity_name: "sensor-001".to_string(),
            snapshot: serde_json::json!({}),
            organization_id: None,
            deleted_at,
            deleted_by: None,
            deletion_reason: None,
            expires_at: TrashLog::expiry_for(deleted_at, 30),
            restored_at: None,
            restored_by: None,
            permanently_deleted_at: None,
        }
    }

    #[test]
    fn expires_thirty_days_after_deletion() {
        let now = Utc::now();
        let item = entry(now);
        assert_eq!(item.expires_at - item.deleted_at, Duration::days(30));
        assert_eq!(item.days_remaining_at(now + Duration::hours(1)), 29);
        assert!(item.can_restore_at(now));
    }

    #[test]
    fn expired_items_cannot_be_restored() {
        let now = Utc::now();
        let item = entry(now - Duration::days(31));
        assert!(!item.can_restore_at(now));
        assert_eq!(item.days_remaining_at(now), 0);
    }

    #[test]
    fn restored_or_purged_items_cannot_be_restored() {
        let now = Utc::now();
        let mut restored = entry(now);
        restored.restored_at = Some(now);
        assert!(!restored.can_restore_at(now));

        let mut purged = entry(now);
        purged.permanently_deleted_at = Some(now);
        assert!(!purged.can_restore_at(now));
    }
}
