// handlers/elevated/users.rs - /api/v1/admin/users and /api/v1/admin/roles

use axum::extract::{Extension, Json, Path, Query};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::{Role, TrashLog, User};
use crate::middleware::{ApiResponse, ApiResult, AuthUser, CurrentUser, DbPool};
use crate::services::user_service::UpdateUserRequest;
use crate::services::UserService;

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RolesBody {
    pub roles: Vec<String>,
}

pub async fn list(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<User>> {
    Ok(ApiResponse::success(UserService::new(pool).list(auth.organization_id).await?))
}

pub async fn get(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<User> {
    Ok(ApiResponse::success(UserService::new(pool).get(auth.organization_id, id).await?))
}

pub async fn update(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> ApiResult<User> {
    let user = UserService::new(pool)
        .update(auth.organization_id, id, request, &actor)
        .await?;
    Ok(ApiResponse::success(user))
}

pub async fn enable(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<User> {
    let user = UserService::new(pool)
        .set_enabled(auth.organization_id, id, true, &actor)
        .await?;
    Ok(ApiResponse::success(user))
}

pub async fn disable(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<User> {
    let user = UserService::new(pool)
        .set_enabled(auth.organization_id, id, false, &actor)
        .await?;
    Ok(ApiResponse::success(user))
}

/// Soft delete into the trash
pub async fn delete(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<TrashLog> {
    let entry = UserService::new(pool)
        .delete(auth.organization_id, id, &actor, query.reason.as_deref())
        .await?;
    Ok(ApiResponse::success(entry))
}

pub async fn replace_roles(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<RolesBody>,
) -> ApiResult<User> {
    let user = UserService::new(pool)
        .replace_roles(auth.organization_id, id, body.roles, &actor)
        .await?;
    Ok(ApiResponse::success(user))
}

pub async fn add_role(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path((id, role)): Path<(Uuid, String)>,
) -> ApiResult<User> {
    let user = UserService::new(pool)
        .add_role(auth.organization_id, id, &role, &actor)
        .await?;
    Ok(ApiResponse::success(user))
}

pub async fn remove_role(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    Path((id, role)): Path<(Uuid, String)>,
) -> ApiResult<User> {
    let user = UserService::new(pool)
        .remove_role(auth.organization_id, id, &role, &actor)
        .await?;
    Ok(ApiResponse::success(user))
}

pub async fn roles(Extension(DbPool(pool)): Extension<DbPool>) -> ApiResult<Vec<Role>> {
    Ok(ApiResponse::success(UserService::new(pool).list_roles().await?))
}
