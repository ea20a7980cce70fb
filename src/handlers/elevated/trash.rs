// handlers/elevated/trash.rs - /api/v1/admin/trash
//
// Organization admins act on their own organization's entries; super
// admins may restore or purge any entry.

use axum::extract::{Extension, Path, Query};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::TrashLog;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser, CurrentUser, DbPool};
use crate::services::trash_service::{TrashItem, TrashStats};
use crate::services::TrashService;
use crate::types::EntityType;

#[derive(Debug, Deserialize)]
pub struct TrashQuery {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
}

/// Organization the caller is confined to, or none for a super admin
pub fn trash_scope(auth: &AuthUser) -> Option<Uuid> {
    (!auth.is_super_admin()).then_some(auth.organization_id)
}

pub async fn list(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<TrashQuery>,
) -> ApiResult<Vec<TrashItem>> {
    let service = TrashService::new(pool);
    let items = match query.entity_type.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(raw) => {
            let entity_type: EntityType = raw.parse().map_err(ApiError::bad_request)?;
            service.list_by_type(auth.organization_id, entity_type).await?
        }
        None => service.list(auth.organization_id).await?,
    };
    Ok(ApiResponse::success(items))
}

pub async fn stats(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<TrashStats> {
    Ok(ApiResponse::success(TrashService::new(pool).stats(auth.organization_id).await?))
}

pub async fn restore(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<TrashLog> {
    let entry = TrashService::new(pool)
        .restore(id, trash_scope(&auth), &actor.username)
        .await?;
    Ok(ApiResponse::success(entry))
}

/// Hard delete now instead of waiting for expiry
pub async fn purge(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<TrashLog> {
    let entry = TrashService::new(pool).permanently_delete(id, trash_scope(&auth)).await?;
    Ok(ApiResponse::success(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::user::{ROLE_ADMIN, ROLE_SUPER_ADMIN};
    use crate::testing::auth_user;

    #[test]
    fn admins_are_confined_to_their_organization() {
        let admin = auth_user(&[ROLE_ADMIN]);
        assert_eq!(trash_scope(&admin), Some(admin.organization_id));
        assert_eq!(trash_scope(&auth_user(&[ROLE_SUPER_ADMIN])), None);
    }
}
