use serde::Deserialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{EventDraft, EventService, ServiceError, ServiceResult, TrashService};
use crate::database::models::user::ROLE_ADMIN;
use crate::database::models::{Role, TrashLog, User};
use crate::types::{EventSeverity, EventType};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

/// Role names look like `ROLE_SOMETHING`
pub fn validate_role_name(name: &str) -> ServiceResult<()> {
    let valid = name
        .strip_prefix("ROLE_")
        .map(|rest| {
            (1..=50).contains(&rest.len()) && rest.chars().all(|c| c.is_ascii_uppercase() || c == '_')
        })
        .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(ServiceError::bad_request(format!("Invalid role name format: {}", name)))
    }
}

/// Guard a change to a user's role set.
///
/// `admin_count` is the number of live admins in the user's organization.
pub fn check_role_change(
    current: &[String],
    proposed: &[String],
    is_self: bool,
    admin_count: i64,
) -> ServiceResult<()> {
    if proposed.is_empty() {
        return Err(ServiceError::bad_request("User must have at least one role assigned"));
    }

    let loses_admin = current.iter().any(|r| r == ROLE_ADMIN) && !proposed.iter().any(|r| r == ROLE_ADMIN);
    if loses_admin {
        if is_self {
            return Err(ServiceError::bad_request("Cannot remove ROLE_ADMIN from your own account"));
        }
        if admin_count <= 1 {
            return Err(ServiceError::bad_request("Cannot remove ROLE_ADMIN from the last admin user"));
        }
    }
    Ok(())
}

/// Guard a user deletion requested by `actor_id`
pub fn check_deletion(user: &User, actor_id: Uuid, admin_count: i64) -> ServiceResult<()> {
    if user.id == actor_id {
        return Err(ServiceError::bad_request("Cannot delete your own account"));
    }
    if user.is_deleted() {
        return Err(ServiceError::bad_request("User is already deleted"));
    }
    if user.is_admin() && admin_count <= 1 {
        return Err(ServiceError::bad_request("Cannot delete the last admin user"));
    }
    Ok(())
}

/// Guard disabling a user on behalf of `actor_id`. `admin_count` counts enabled admins.
pub fn check_disable(user: &User, actor_id: Uuid, admin_count: i64) -> ServiceResult<()> {
    if user.id == actor_id {
        return Err(ServiceError::bad_request("Cannot disable your own account"));
    }
    if user.is_admin() && user.enabled && admin_count <= 1 {
        return Err(ServiceError::bad_request("Cannot disable the last admin user"));
    }
    Ok(())
}

fn normalize(roles: Vec<String>) -> Vec<String> {
    let mut roles: Vec<String> = roles.into_iter().map(|r| r.trim().to_string()).collect();
    roles.sort();
    roles.dedup();
    roles
}

pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn emit(&self, user: &User, event_type: EventType, title: &str, actor: &str) {
        EventService::new(self.pool.clone())
            .emit_quietly(
                EventDraft::new(user.organization_id, event_type, EventSeverity::Info, title)
                    .entity("USER", user.id)
                    .description(format!("{} '{}' by {}", title, user.username, actor)),
            )
            .await;
    }

    pub async fn list(&self, organization_id: Uuid) -> ServiceResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE organization_id = $1 AND deleted_at IS NULL ORDER BY username",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    pub async fn get(&self, organization_id: Uuid, user_id: Uuid) -> ServiceResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::not_found(format!("User not found: {}", user_id)))
    }

    /// Lock the organization's live admins until `tx` ends. Guards on the
    /// same organization queue here, so two demotions cannot both see a
    /// second admin.
    async fn lock_admins(tx: &mut Transaction<'_, Postgres>, organization_id: Uuid) -> ServiceResult<Vec<User>> {
        let admins = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE organization_id = $1 AND deleted_at IS NULL AND $2 = ANY(roles)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(organization_id)
        .bind(ROLE_ADMIN)
        .fetch_all(&mut **tx)
        .await?;
        Ok(admins)
    }

    /// Current row of the user, locked until `tx` ends. Includes soft-deleted users.
    async fn lock_user(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND organization_id = $2 FOR UPDATE")
            .bind(user_id)
            .bind(organization_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("User not found: {}", user_id)))
    }

    async fn lock_live_user(
        tx: &mut Transaction<'_, Postgres>,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> ServiceResult<User> {
        let user = Self::lock_user(tx, organization_id, user_id).await?;
        if user.is_deleted() {
            return Err(ServiceError::not_found(format!("User not found: {}", user_id)));
        }
        Ok(user)
    }

    pub async fn set_enabled(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        enabled: bool,
        actor: &User,
    ) -> ServiceResult<User> {
        let mut tx = self.pool.begin().await?;
        let admins = Self::lock_admins(&mut tx, organization_id).await?;
        let user = Self::lock_live_user(&mut tx, organization_id, user_id).await?;
        if !enabled {
            let enabled_admins = admins.iter().filter(|a| a.enabled).count() as i64;
            check_disable(&user, actor.id, enabled_admins)?;
        }

        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET enabled = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(user_id)
        .bind(enabled)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(
            "User '{}' {} by {}",
            user.username,
            if enabled { "enabled" } else { "disabled" },
            actor.username
        );
        let title = if enabled { "User enabled" } else { "User disabled" };
        self.emit(&user, EventType::UserUpdated, title, &actor.username).await;
        Ok(user)
    }

    pub async fn update(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        request: UpdateUserRequest,
        actor: &User,
    ) -> ServiceResult<User> {
        self.get(organization_id, user_id).await?;
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                email = COALESCE($4, email),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.email)
        .fetch_one(&self.pool)
        .await?;
        self.emit(&user, EventType::UserUpdated, "User updated", &actor.username).await;
        Ok(user)
    }

    pub async fn delete(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        actor: &User,
        reason: Option<&str>,
    ) -> ServiceResult<TrashLog> {
        let mut tx = self.pool.begin().await?;
        let admin_count = Self::lock_admins(&mut tx, organization_id).await?.len() as i64;
        let user = Self::lock_user(&mut tx, organization_id, user_id).await?;
        check_deletion(&user, actor.id, admin_count)?;

        let entry = TrashService::new(self.pool.clone())
            .soft_delete_user_in(&mut tx, &user, &actor.username, reason)
            .await?;
        tx.commit().await?;

        tracing::info!("User '{}' moved to trash by {}", user.username, actor.username);
        self.emit(&user, EventType::UserDeleted, "User deleted", &actor.username).await;
        Ok(entry)
    }

    pub async fn list_roles(&self) -> ServiceResult<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    async fn ensure_roles_exist(&self, roles: &[String]) -> ServiceResult<()> {
        for role in roles {
            validate_role_name(role)?;
            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM roles WHERE name = $1)")
                .bind(role)
                .fetch_one(&self.pool)
                .await?;
            if !exists {
                return Err(ServiceError::not_found(format!("Role not found: {}", role)));
            }
        }
        Ok(())
    }

    pub async fn replace_roles(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        roles: Vec<String>,
        actor: &User,
    ) -> ServiceResult<User> {
        let proposed = normalize(roles);
        self.ensure_roles_exist(&proposed).await?;

        let mut tx = self.pool.begin().await?;
        let admin_count = Self::lock_admins(&mut tx, organization_id).await?.len() as i64;
        let user = Self::lock_live_user(&mut tx, organization_id, user_id).await?;
        check_role_change(&user.roles, &proposed, user.id == actor.id, admin_count)?;

        let updated = Self::store_roles(&mut tx, &user, proposed, &actor.username).await?;
        tx.commit().await?;
        self.emit(&updated, EventType::UserUpdated, "User roles changed", &actor.username).await;
        Ok(updated)
    }

    pub async fn add_role(&self, organization_id: Uuid, user_id: Uuid, role: &str, actor: &User) -> ServiceResult<User> {
        self.ensure_roles_exist(&[role.to_string()]).await?;

        let mut tx = self.pool.begin().await?;
        let user = Self::lock_live_user(&mut tx, organization_id, user_id).await?;
        let mut roles = user.roles.clone();
        roles.push(role.to_string());

        let updated = Self::store_roles(&mut tx, &user, normalize(roles), &actor.username).await?;
        tx.commit().await?;
        self.emit(&updated, EventType::UserUpdated, "User roles changed", &actor.username).await;
        Ok(updated)
    }

    pub async fn remove_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: &str,
        actor: &User,
    ) -> ServiceResult<User> {
        validate_role_name(role)?;

        let mut tx = self.pool.begin().await?;
        let admin_count = Self::lock_admins(&mut tx, organization_id).await?.len() as i64;
        let user = Self::lock_live_user(&mut tx, organization_id, user_id).await?;
        let proposed: Vec<String> = user.roles.iter().filter(|r| *r != role).cloned().collect();
        check_role_change(&user.roles, &proposed, user.id == actor.id, admin_count)?;

        let updated = Self::store_roles(&mut tx, &user, proposed, &actor.username).await?;
        tx.commit().await?;
        self.emit(&updated, EventType::UserUpdated, "User roles changed", &actor.username).await;
        Ok(updated)
    }

    async fn store_roles(
        tx: &mut Transaction<'_, Postgres>,
        user: &User,
        roles: Vec<String>,
        actor: &str,
    ) -> ServiceResult<User> {
        let updated = sqlx::query_as::<_, User>(
            "UPDATE users SET roles = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(user.id)
        .bind(&roles)
        .fetch_one(&mut **tx)
        .await?;
        tracing::info!("Roles of '{}' set to {:?} by {}", updated.username, updated.roles, actor);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::testing::{roles, user};

    #[test]
    fn role_names_must_be_prefixed_upper_case() {
        assert!(validate_role_name("ROLE_ADMIN").is_ok());
        assert!(validate_role_name("ROLE_FLEET_MANAGER").is_ok());
        for bad in ["ROLE_", "ADMIN", "role_admin", "ROLE_admin", "ROLE_A1", "ROLE-ADMIN"] {
            let err = validate_role_name(bad).unwrap_err();
            assert_eq!(err.to_string(), format!("Invalid role name format: {}", bad));
        }
        let too_long = format!("ROLE_{}", "A".repeat(51));
        assert!(validate_role_name(&too_long).is_err());
    }

    #[test]
    fn empty_role_set_is_rejected() {
        let err = check_role_change(&roles(&["ROLE_USER"]), &[], false, 2).unwrap_err();
        assert_eq!(err.to_string(), "User must have at least one role assigned");
    }

    #[test]
    fn admins_cannot_demote_themselves() {
        let err = check_role_change(&roles(&["ROLE_ADMIN"]), &roles(&["ROLE_USER"]), true, 3).unwrap_err();
        assert_eq!(err.to_string(), "Cannot remove ROLE_ADMIN from your own account");
    }

    #[test]
    fn last_admin_keeps_admin_role() {
        let err = check_role_change(&roles(&["ROLE_ADMIN", "ROLE_USER"]), &roles(&["ROLE_USER"]), false, 1)
            .unwrap_err();
        assert_eq!(err.to_string(), "Cannot remove ROLE_ADMIN from the last admin user");
        assert!(check_role_change(&roles(&["ROLE_ADMIN"]), &roles(&["ROLE_USER"]), false, 2).is_ok());
    }

    #[test]
    fn deletion_guards() {
        let admin = user(&["ROLE_ADMIN"]);
        let err = check_deletion(&admin, admin.id, 2).unwrap_err();
        assert_eq!(err.to_string(), "Cannot delete your own account");

        let err = check_deletion(&admin, Uuid::new_v4(), 1).unwrap_err();
        assert_eq!(err.to_string(), "Cannot delete the last admin user");

        let mut gone = user(&["ROLE_USER"]);
        gone.deleted_at = Some(Utc::now());
        let err = check_deletion(&gone, Uuid::new_v4(), 1).unwrap_err();
        assert_eq!(err.to_string(), "User is already deleted");

        assert!(check_deletion(&user(&["ROLE_USER"]), Uuid::new_v4(), 1).is_ok());
    }

    #[test]
    fn disable_guards() {
        let admin = user(&["ROLE_ADMIN"]);
        let err = check_disable(&admin, admin.id, 2).unwrap_err();
        assert_eq!(err.to_string(), "Cannot disable your own account");

        let err = check_disable(&admin, Uuid::new_v4(), 1).unwrap_err();
        assert_eq!(err.to_string(), "Cannot disable the last admin user");
        assert!(check_disable(&admin, Uuid::new_v4(), 2).is_ok());

        let mut already_off = user(&["ROLE_ADMIN"]);
        already_off.enabled = false;
        assert!(check_disable(&already_off, Uuid::new_v4(), 1).is_ok());
        assert!(check_disable(&user(&["ROLE_USER"]), Uuid::new_v4(), 1).is_ok());
    }

    #[test]
    fn normalize_dedupes_roles() {
        assert_eq!(
            normalize(roles(&["ROLE_USER", " ROLE_ADMIN", "ROLE_USER"])),
            roles(&["ROLE_ADMIN", "ROLE_USER"])
        );
    }
}
