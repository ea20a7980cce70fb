// handlers/elevated/organizations.rs - /api/v1/admin/organizations
//
// Listing every organization, creating and deleting them is reserved to
// ROLE_SUPER_ADMIN. An organization admin only sees their own.

use axum::extract::{Extension, Json, Path, Query};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::{Organization, TrashLog};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser, CurrentUser, DbPool};
use crate::services::organization_service::CreateOrganizationRequest;
use crate::services::{OrganizationService, TrashService};

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub reason: Option<String>,
}

/// Whether the caller may look at `organization_id`
pub fn can_view(auth: &AuthUser, organization_id: Uuid) -> bool {
    auth.is_super_admin() || auth.organization_id == organization_id
}

pub async fn list(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<Organization>> {
    let service = OrganizationService::new(pool);
    let organizations = if auth.is_super_admin() {
        service.list().await?
    } else {
        vec![service.get(auth.organization_id).await?]
    };
    Ok(ApiResponse::success(organizations))
}

pub async fn create(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<CreateOrganizationRequest>,
) -> ApiResult<Organization> {
    auth.require_super_admin()?;
    let organization = OrganizationService::new(pool).create(request).await?;
    Ok(ApiResponse::created(organization))
}

pub async fn get(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Organization> {
    if !can_view(&auth, id) {
        return Err(ApiError::forbidden("Access denied to organization"));
    }
    Ok(ApiResponse::success(OrganizationService::new(pool).get(id).await?))
}

pub async fn delete(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<TrashLog> {
    auth.require_super_admin()?;
    if id == auth.organization_id {
        return Err(ApiError::bad_request("Cannot delete your own organization"));
    }
    let entry = TrashService::new(pool)
        .soft_delete_organization(id, &actor.username, query.reason.as_deref())
        .await?;
    Ok(ApiResponse::success(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::user::{ROLE_ADMIN, ROLE_SUPER_ADMIN};
    use crate::testing::auth_user;

    #[test]
    fn admins_only_view_their_own_organization() {
        let mut auth = auth_user(&[ROLE_ADMIN]);
        assert!(can_view(&auth, auth.organization_id));
        assert!(!can_view(&auth, Uuid::new_v4()));

        auth.roles.push(ROLE_SUPER_ADMIN.into());
        assert!(can_view(&auth, Uuid::new_v4()));
    }
}
