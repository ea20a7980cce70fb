use chrono::Utc;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::config::config;
use crate::database::models::{Device, Organization, TrashLog, User};
use crate::types::EntityType;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrashStats {
    pub total_items: i64,
    pub users: i64,
    pub devices: i64,
    pub organizations: i64,
}

/// A trash entry with its restore window resolved against now
#[derive(Debug, Clone, Serialize)]
pub struct TrashItem {
    #[serde(flatten)]
    pub entry: TrashLog,
    pub can_restore: bool,
    pub days_remaining: i64,
}

impl From<TrashLog> for TrashItem {
    fn from(entry: TrashLog) -> Self {
        let now = Utc::now();
        Self {
            can_restore: entry.can_restore_at(now),
            days_remaining: entry.days_remaining_at(now),
            entry,
        }
    }
}

fn table_for(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::User => "users",
        EntityType::Device => "devices",
        EntityType::Organization => "organizations",
    }
}

fn enabled_column(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::User | EntityType::Organization => "enabled",
        EntityType::Device => "active",
    }
}

pub struct TrashService {
    pool: PgPool,
    retention_days: i64,
}

impl TrashService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retention_days: config().trash.retention_days,
        }
    }

    /// Soft delete `user` inside a caller's transaction, alongside its own checks
    pub async fn soft_delete_user_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user: &User,
        actor: &str,
        reason: Option<&str>,
    ) -> ServiceResult<TrashLog> {
        if user.is_deleted() {
            return Err(already_deleted(EntityType::User));
        }
        let snapshot = serde_json::to_value(user).unwrap_or_default();
        self.trash_in(
            tx,
            EntityType::User,
            user.id,
            &user.username,
            snapshot,
            Some(user.organization_id),
            actor,
            reason,
        )
        .await
    }

    pub async fn soft_delete_device(&self, device_id: Uuid, actor: &str, reason: Option<&str>) -> ServiceResult<TrashLog> {
        let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Device not found: {}", device_id)))?;

        if device.is_deleted() {
            return Err(already_deleted(EntityType::Device));
        }

        let snapshot = serde_json::to_value(&device).unwrap_or_default();
        self.move_to_trash(
            EntityType::Device,
            device.id,
            &device.external_id,
            snapshot,
            Some(device.organization_id),
            actor,
            reason,
        )
        .await
    }

    pub async fn soft_delete_organization(
        &self,
        organization_id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> ServiceResult<TrashLog> {
        let org = sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = $1")
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("Organization not found: {}", organization_id)))?;

        if org.is_deleted() {
            return Err(already_deleted(EntityType::Organization));
        }

        let active_users: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE organization_id = $1 AND deleted_at IS NULL",
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        if active_users > 0 {
            return Err(ServiceError::bad_request(format!(
                "Cannot delete organization with {} active users. Delete or reassign users first.",
                active_users
            )));
        }

        let snapshot = serde_json::to_value(&org).unwrap_or_default();
        self.move_to_trash(
            EntityType::Organization,
            org.id,
            &org.name,
            snapshot,
            Some(org.id),
            actor,
            reason,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn move_to_trash(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        entity_name: &str,
        snapshot: serde_json::Value,
        organization_id: Option<Uuid>,
        actor: &str,
        reason: Option<&str>,
    ) -> ServiceResult<TrashLog> {
        let mut tx = self.pool.begin().await?;
        let entry = self
            .trash_in(&mut tx, entity_type, entity_id, entity_name, snapshot, organization_id, actor, reason)
            .await?;
        tx.commit().await?;

        tracing::info!(
            "{} '{}' moved to trash by {} (expires {})",
            entity_type.label(),
            entity_name,
            actor,
            entry.expires_at
        );
        Ok(entry)
    }

    #[allow(clippy::too_many_arguments)]
    async fn trash_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entity_type: EntityType,
        entity_id: Uuid,
        entity_name: &str,
        snapshot: serde_json::Value,
        organization_id: Option<Uuid>,
        actor: &str,
        reason: Option<&str>,
    ) -> ServiceResult<TrashLog> {
        let deleted_at = Utc::now();
        let expires_at = TrashLog::expiry_for(deleted_at, self.retention_days);

        let sql = format!(
            "UPDATE {} SET deleted_at = $2, deleted_by = $3, deletion_reason = $4, {} = FALSE, updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL",
            table_for(entity_type),
            enabled_column(entity_type)
        );
        let updated = sqlx::query(&sql)
            .bind(entity_id)
            .bind(deleted_at)
            .bind(actor)
            .bind(reason)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(already_deleted(entity_type));
        }

        let entry = sqlx::query_as::<_, TrashLog>(
            r#"
            INSERT INTO trash_log
                (entity_type, entity_id, entity_name, snapshot, organization_id,
                 deleted_at, deleted_by, deletion_reason, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(entity_type)
        .bind(entity_id.to_string())
        .bind(entity_name)
        .bind(&snapshot)
        .bind(organization_id)
        .bind(deleted_at)
        .bind(actor)
        .bind(reason)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await?;
        Ok(entry)
    }

    async fn get_entry(&self, trash_id: Uuid, scope: Option<Uuid>) -> ServiceResult<TrashLog> {
        let entry = sqlx::query_as::<_, TrashLog>("SELECT * FROM trash_log WHERE id = $1")
            .bind(trash_id)
            .fetch_optional(&self.pool)
            .await?;

        match entry {
            Some(entry) if scope.is_none() || entry.organization_id == scope => Ok(entry),
            _ => Err(ServiceError::not_found(format!("Trash item not found: {}", trash_id))),
        }
    }

    /// Undo a soft delete. `scope` limits the lookup to one organization.
    pub async fn restore(&self, trash_id: Uuid, scope: Option<Uuid>, actor: &str) -> ServiceResult<TrashLog> {
        let entry = self.get_entry(trash_id, scope).await?;
        if !entry.can_restore() {
            return Err(ServiceError::bad_request(
                "Item cannot be restored (already restored, permanently deleted, or expired)",
            ));
        }

        let entity_id = parse_entity_id(&entry)?;
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE {} SET deleted_at = NULL, deleted_by = NULL, deletion_reason = NULL, {} = TRUE, updated_at = now() \
             WHERE id = $1",
            table_for(entry.entity_type),
            enabled_column(entry.entity_type)
        );
        let restored = sqlx::query(&sql).bind(entity_id).execute(&mut *tx).await?.rows_affected();
        if restored == 0 {
            return Err(ServiceError::not_found(format!(
                "{} no longer exists: {}",
                entry.entity_type.label(),
                entry.entity_name
            )));
        }

        let entry = sqlx::query_as::<_, TrashLog>(
            "UPDATE trash_log SET restored_at = now(), restored_by = $2 WHERE id = $1 RETURNING *",
        )
        .bind(trash_id)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!("{} '{}' restored by {}", entry.entity_type.label(), entry.entity_name, actor);
        Ok(entry)
    }

    pub async fn permanently_delete(&self, trash_id: Uuid, scope: Option<Uuid>) -> ServiceResult<TrashLog> {
        let entry = self.get_entry(trash_id, scope).await?;
        if entry.restored_at.is_some() || entry.permanently_deleted_at.is_some() {
            return Err(ServiceError::bad_request("Item is no longer in the trash"));
        }

        let mut tx = self.pool.begin().await?;
        let entry = hard_delete(&mut tx, entry).await?;
        tx.commit().await?;

        tracing::info!("{} '{}' permanently deleted", entry.entity_type.label(), entry.entity_name);
        Ok(entry)
    }

    /// Hard-delete everything whose restore window has passed
    pub async fn purge_expired(&self) -> ServiceResult<usize> {
        let expired = sqlx::query_as::<_, TrashLog>(
            r#"
            SELECT * FROM trash_log
            WHERE expires_at <= now() AND restored_at IS NULL AND permanently_deleted_at IS NULL
            ORDER BY expires_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut purged = 0;
        for entry in expired {
            let id = entry.id;
            let mut tx = self.pool.begin().await?;
            match hard_delete(&mut tx, entry).await {
                Ok(_) => {
                    tx.commit().await?;
                    purged += 1;
                }
                Err(e) => tracing::error!("Failed to purge trash item {}: {}", id, e),
            }
        }

        if purged > 0 {
            tracing::info!("Purged {} expired trash items", purged);
        }
        Ok(purged)
    }

    pub async fn list(&self, organization_id: Uuid) -> ServiceResult<Vec<TrashItem>> {
        let entries = sqlx::query_as::<_, TrashLog>(
            r#"
            SELECT * FROM trash_log
            WHERE organization_id = $1 AND restored_at IS NULL AND permanently_deleted_at IS NULL
            ORDER BY deleted_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries.into_iter().map(TrashItem::from).collect())
    }

    pub async fn list_by_type(&self, organization_id: Uuid, entity_type: EntityType) -> ServiceResult<Vec<TrashItem>> {
        let items = self.list(organization_id).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.entry.entity_type == entity_type)
            .collect())
    }

    /// Counts of restorable items
    pub async fn stats(&self, organization_id: Uuid) -> ServiceResult<TrashStats> {
        let items = self.list(organization_id).await?;
        Ok(stats_for(items.iter().filter(|i| i.can_restore).map(|i| i.entry.entity_type)))
    }
}

fn already_deleted(entity_type: EntityType) -> ServiceError {
    ServiceError::bad_request(format!("{} is already deleted", entity_type.label()))
}

fn parse_entity_id(entry: &TrashLog) -> ServiceResult<Uuid> {
    Uuid::parse_str(&entry.entity_id)
        .map_err(|_| ServiceError::bad_request(format!("Invalid entity id in trash: {}", entry.entity_id)))
}

async fn hard_delete(tx: &mut Transaction<'_, Postgres>, entry: TrashLog) -> ServiceResult<TrashLog> {
    let entity_id = parse_entity_id(&entry)?;
    let sql = format!("DELETE FROM {} WHERE id = $1", table_for(entry.entity_type));
    sqlx::query(&sql).bind(entity_id).execute(&mut **tx).await?;

    let entry = sqlx::query_as::<_, TrashLog>(
        "UPDATE trash_log SET permanently_deleted_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(entry.id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(entry)
}

fn stats_for(types: impl Iterator<Item = EntityType>) -> TrashStats {
    let mut stats = TrashStats {
        total_items: 0,
        users: 0,
        devices: 0,
        organizations: 0,
    };
    for entity_type in types {
        stats.total_items += 1;
        match entity_type {
            EntityType::User => stats.users += 1,
            EntityType::Device => stats.devices += 1,
            EntityType::Organization => stats.organizations += 1,
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_each_type() {
        let stats = stats_for(
            [EntityType::User, EntityType::Device, EntityType::Device, EntityType::Organization].into_iter(),
        );
        assert_eq!(
            stats,
            TrashStats {
                total_items: 4,
                users: 1,
                devices: 2,
                organizations: 1
            }
        );
    }

    #[test]
    fn soft_delete_touches_the_right_columns() {
        assert_eq!(table_for(EntityType::Device), "devices");
        assert_eq!(enabled_column(EntityType::Device), "active");
        assert_eq!(enabled_column(EntityType::User), "enabled");
        assert_eq!(table_for(EntityType::Organization), "organizations");
    }

    #[test]
    fn already_deleted_message_names_the_type() {
        assert_eq!(already_deleted(EntityType::User).to_string(), "User is already deleted");
        assert_eq!(already_deleted(EntityType::Device).to_string(), "Device is already deleted");
    }
}
