// handlers/protected/global_rules.rs - /api/v1/global-rules and /api/v1/global-alerts

use axum::extract::{Extension, Json, Path, Query};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::{GlobalAlert, GlobalRule};
use crate::middleware::{ApiResponse, ApiResult, AuthUser, CurrentUser, DbPool};
use crate::services::global_rule::GlobalRuleRequest;
use crate::services::GlobalRuleService;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalAlertsQuery {
    #[serde(default)]
    pub unacknowledged_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    pub triggered: bool,
    pub alert: Option<GlobalAlert>,
}

impl From<Option<GlobalAlert>> for EvaluationOutcome {
    fn from(alert: Option<GlobalAlert>) -> Self {
        Self {
            triggered: alert.is_some(),
            alert,
        }
    }
}

pub async fn list(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<GlobalRule>> {
    Ok(ApiResponse::success(GlobalRuleService::new(pool).list(auth.organization_id).await?))
}

pub async fn get(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<GlobalRule> {
    Ok(ApiResponse::success(GlobalRuleService::new(pool).get(auth.organization_id, id).await?))
}

pub async fn create(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<GlobalRuleRequest>,
) -> ApiResult<GlobalRule> {
    let rule = GlobalRuleService::new(pool).create(auth.organization_id, request).await?;
    Ok(ApiResponse::created(rule))
}

pub async fn update(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<GlobalRuleRequest>,
) -> ApiResult<GlobalRule> {
    let rule = GlobalRuleService::new(pool).update(auth.organization_id, id, request).await?;
    Ok(ApiResponse::success(rule))
}

pub async fn delete(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    GlobalRuleService::new(pool).delete(auth.organization_id, id).await?;
    Ok(ApiResponse::no_content())
}

pub async fn toggle(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<GlobalRule> {
    Ok(ApiResponse::success(GlobalRuleService::new(pool).toggle(auth.organization_id, id).await?))
}

/// POST /api/v1/global-rules/:id/evaluate (strict rate limit)
pub async fn evaluate(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<EvaluationOutcome> {
    let alert = GlobalRuleService::new(pool).evaluate_now(auth.organization_id, id).await?;
    Ok(ApiResponse::success(alert.into()))
}

pub async fn alerts(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<GlobalAlertsQuery>,
) -> ApiResult<Vec<GlobalAlert>> {
    let alerts = GlobalRuleService::new(pool)
        .list_alerts(auth.organization_id, query.unacknowledged_only)
        .await?;
    Ok(ApiResponse::success(alerts))
}

pub async fn acknowledge_alert(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<GlobalAlert> {
    let alert = GlobalRuleService::new(pool)
        .acknowledge_alert(auth.organization_id, id, &user.username)
        .await?;
    Ok(ApiResponse::success(alert))
}
