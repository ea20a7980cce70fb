// handlers/protected/rules.rs - /api/v1/rules and /api/v1/alerts

use axum::extract::{Extension, Json, Path, Query};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::{Alert, Rule};
use crate::middleware::{ApiResponse, ApiResult, AuthUser, CurrentUser, DbPool};
use crate::services::rule_service::RuleRequest;
use crate::services::{AlertService, RuleService};

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub limit: Option<i64>,
}

pub async fn list(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<Rule>> {
    Ok(ApiResponse::success(RuleService::new(pool).list(auth.organization_id).await?))
}

pub async fn get(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Rule> {
    Ok(ApiResponse::success(RuleService::new(pool).get(auth.organization_id, id).await?))
}

pub async fn create(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<RuleRequest>,
) -> ApiResult<Rule> {
    let rule = RuleService::new(pool).create(auth.organization_id, request).await?;
    Ok(ApiResponse::created(rule))
}

pub async fn update(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<RuleRequest>,
) -> ApiResult<Rule> {
    let rule = RuleService::new(pool).update(auth.organization_id, id, request).await?;
    Ok(ApiResponse::success(rule))
}

pub async fn delete(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    RuleService::new(pool).delete(auth.organization_id, id).await?;
    Ok(ApiResponse::no_content())
}

/// GET /api/v1/alerts, newest first
pub async fn alerts(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<AlertsQuery>,
) -> ApiResult<Vec<Alert>> {
    let alerts = AlertService::new(pool).list(auth.organization_id, query.limit).await?;
    Ok(ApiResponse::success(alerts))
}

pub async fn unacknowledged_alerts(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<Alert>> {
    let alerts = AlertService::new(pool).unacknowledged(auth.organization_id).await?;
    Ok(ApiResponse::success(alerts))
}

pub async fn acknowledge_alert(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Alert> {
    let alert = AlertService::new(pool)
        .acknowledge(auth.organization_id, id, &user.username)
        .await?;
    Ok(ApiResponse::success(alert))
}
