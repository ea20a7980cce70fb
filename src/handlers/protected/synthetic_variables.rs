// handlers/protected/synthetic_variables.rs - /api/v1/synthetic-variables

use axum::extract::{Extension, Json, Path, Query};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::{SyntheticVariable, SyntheticVariableValue};
use crate::middleware::{ApiResponse, ApiResult, AuthUser, DbPool};
use crate::services::synthetic_variable_service::SyntheticVariableRequest;
use crate::services::SyntheticVariableService;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValuesQuery {
    pub limit: Option<i64>,
}

pub async fn list(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<SyntheticVariable>> {
    let variables = SyntheticVariableService::new(pool)
        .list(auth.organization_id, query.device_id.as_deref())
        .await?;
    Ok(ApiResponse::success(variables))
}

pub async fn get(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<SyntheticVariable> {
    let variable = SyntheticVariableService::new(pool).get(auth.organization_id, id).await?;
    Ok(ApiResponse::success(variable))
}

pub async fn create(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<SyntheticVariableRequest>,
) -> ApiResult<SyntheticVariable> {
    let variable = SyntheticVariableService::new(pool)
        .create(auth.organization_id, request)
        .await?;
    Ok(ApiResponse::created(variable))
}

pub async fn update(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<SyntheticVariableRequest>,
) -> ApiResult<SyntheticVariable> {
    let variable = SyntheticVariableService::new(pool)
        .update(auth.organization_id, id, request)
        .await?;
    Ok(ApiResponse::success(variable))
}

pub async fn delete(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    SyntheticVariableService::new(pool).delete(auth.organization_id, id).await?;
    Ok(ApiResponse::no_content())
}

/// Most recent computed values, newest first
pub async fn values(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Query(query): Query<ValuesQuery>,
) -> ApiResult<Vec<SyntheticVariableValue>> {
    let values = SyntheticVariableService::new(pool)
        .values(auth.organization_id, id, query.limit)
        .await?;
    Ok(ApiResponse::success(values))
}
