// handlers/elevated/retention.rs - /api/v1/admin/retention

use axum::extract::{Extension, Json, Query};
use serde::Deserialize;

use crate::database::models::{DataArchiveExecution, DataRetentionPolicy};
use crate::middleware::{ApiResponse, ApiResult, AuthUser, DbPool};
use crate::services::data_retention_service::RetentionPolicyRequest;
use crate::services::DataRetentionService;

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub limit: Option<i64>,
}

pub async fn get_policy(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<DataRetentionPolicy> {
    let policy = DataRetentionService::new(pool).get_policy(auth.organization_id).await?;
    Ok(ApiResponse::success(policy))
}

pub async fn put_policy(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<RetentionPolicyRequest>,
) -> ApiResult<DataRetentionPolicy> {
    let policy = DataRetentionService::new(pool)
        .upsert_policy(auth.organization_id, request)
        .await?;
    Ok(ApiResponse::success(policy))
}

/// POST /api/v1/admin/retention/run (strict rate limit)
pub async fn run(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<DataArchiveExecution> {
    tracing::info!("Manual retention run requested by {}", auth.username);
    let execution = DataRetentionService::new(pool).execute_now(auth.organization_id).await?;
    Ok(ApiResponse::success(execution))
}

pub async fn executions(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ExecutionsQuery>,
) -> ApiResult<Vec<DataArchiveExecution>> {
    let executions = DataRetentionService::new(pool)
        .executions(auth.organization_id, query.limit)
        .await?;
    Ok(ApiResponse::success(executions))
}
