// handlers/protected/variables.rs - /api/v1/variables
//
// History and statistics sit behind the strict rate limiter.

use axum::extract::{Extension, Json, Path, Query};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::models::{Variable, VariableValue};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser, DbPool};
use crate::services::variable_service::{VariableRequest, VariableStatistics};
use crate::services::{DeviceService, VariableService};

/// Window used when a range query leaves out `from`
const DEFAULT_RANGE_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// External device id
    pub device_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl RangeQuery {
    /// `to` defaults to now and `from` to a day before `to`
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
        let to = self.to.unwrap_or(now);
        let from = match self.from {
            Some(from) => from,
            None => to
                .checked_sub_signed(Duration::hours(DEFAULT_RANGE_HOURS))
                .ok_or_else(|| ApiError::bad_request("'to' is out of range"))?,
        };
        if from > to {
            return Err(ApiError::bad_request("'from' must be before 'to'"));
        }
        Ok((from, to))
    }
}

pub async fn list(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Variable>> {
    let device_id = match query.device_id.as_deref() {
        Some(external_id) => Some(
            DeviceService::new(pool.clone())
                .get_in_org(auth.organization_id, external_id)
                .await?
                .id,
        ),
        None => None,
    };
    let variables = VariableService::new(pool).list(auth.organization_id, device_id).await?;
    Ok(ApiResponse::success(variables))
}

pub async fn templates(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<Variable>> {
    let variables = VariableService::new(pool).list_templates(auth.organization_id).await?;
    Ok(ApiResponse::success(variables))
}

pub async fn get(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Variable> {
    let variable = VariableService::new(pool).get(auth.organization_id, id).await?;
    Ok(ApiResponse::success(variable))
}

pub async fn create(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Json(request): Json<VariableRequest>,
) -> ApiResult<Variable> {
    let variable = VariableService::new(pool).create(auth.organization_id, request).await?;
    Ok(ApiResponse::created(variable))
}

pub async fn update(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<VariableRequest>,
) -> ApiResult<Variable> {
    let variable = VariableService::new(pool).update(auth.organization_id, id, request).await?;
    Ok(ApiResponse::success(variable))
}

pub async fn delete(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    VariableService::new(pool).delete(auth.organization_id, id).await?;
    Ok(ApiResponse::no_content())
}

pub async fn history(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Vec<VariableValue>> {
    let (from, to) = range.resolve(Utc::now())?;
    let values = VariableService::new(pool)
        .history(auth.organization_id, id, from, to, range.limit)
        .await?;
    Ok(ApiResponse::success(values))
}

pub async fn statistics(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<VariableStatistics> {
    let (from, to) = range.resolve(Utc::now())?;
    let stats = VariableService::new(pool)
        .statistics(auth.organization_id, id, from, to)
        .await?;
    Ok(ApiResponse::success(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_defaults_to_the_last_day() {
        let now = Utc::now();
        let (from, to) = RangeQuery::default().resolve(now).unwrap();
        assert_eq!(to, now);
        assert_eq!(to - from, Duration::hours(24));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let now = Utc::now();
        let range = RangeQuery {
            from: Some(now),
            to: Some(now - Duration::minutes(1)),
            limit: None,
        };
        assert_eq!(range.resolve(now).unwrap_err().status_code(), 400);
    }

    #[test]
    fn earliest_representable_to_is_rejected() {
        let range = RangeQuery {
            from: None,
            to: Some(DateTime::<Utc>::MIN_UTC),
            limit: None,
        };
        assert_eq!(range.resolve(Utc::now()).unwrap_err().status_code(), 400);
    }
}
