// handlers/protected/events.rs - /api/v1/events

use axum::extract::{Extension, Query};
use serde::Deserialize;

use crate::database::models::Event;
use crate::middleware::{ApiResponse, ApiResult, AuthUser, DbPool};
use crate::services::event_service::{EventCount, EventFilter};
use crate::services::EventService;

const DEFAULT_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub hours: Option<i64>,
    pub limit: Option<i64>,
}

impl WindowQuery {
    fn hours(&self) -> i64 {
        self.hours.unwrap_or(DEFAULT_HOURS)
    }
}

/// GET /api/v1/events?eventType&severity&limit
pub async fn list(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(filter): Query<EventFilter>,
) -> ApiResult<Vec<Event>> {
    Ok(ApiResponse::success(EventService::new(pool).list(auth.organization_id, &filter).await?))
}

pub async fn recent(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(window): Query<WindowQuery>,
) -> ApiResult<Vec<Event>> {
    let events = EventService::new(pool)
        .recent(auth.organization_id, window.hours(), window.limit)
        .await?;
    Ok(ApiResponse::success(events))
}

pub async fn statistics_by_type(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(window): Query<WindowQuery>,
) -> ApiResult<Vec<EventCount>> {
    let counts = EventService::new(pool)
        .statistics_by_type(auth.organization_id, window.hours())
        .await?;
    Ok(ApiResponse::success(counts))
}

pub async fn statistics_by_severity(
    Extension(DbPool(pool)): Extension<DbPool>,
    Extension(auth): Extension<AuthUser>,
    Query(window): Query<WindowQuery>,
) -> ApiResult<Vec<EventCount>> {
    let counts = EventService::new(pool)
        .statistics_by_severity(auth.organization_id, window.hours())
        .await?;
    Ok(ApiResponse::success(counts))
}
