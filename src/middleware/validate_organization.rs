use axum::{extract::Request, middleware::Next, response::Response};
use sqlx::PgPool;

use super::auth::AuthUser;
use crate::database::manager::DatabaseManager;
use crate::database::models::Organization;
use crate::error::ApiError;
use crate::services::OrganizationService;

/// Database pool for the request, injected once the organization is validated
#[derive(Clone)]
pub struct DbPool(pub PgPool);

/// The caller's organization, known to exist, be enabled and not be deleted
#[derive(Clone, Debug)]
pub struct CurrentOrganization(pub Organization);

pub async fn validate_organization_middleware(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before organization validation"))?;

    let pool = DatabaseManager::main_pool().await?;

    let organization = OrganizationService::new(pool.clone())
        .find(auth_user.organization_id)
        .await?
        .ok_or_else(|| {
            tracing::warn!(
                "Organization validation failed: {} not found or deleted",
                auth_user.organization_id
            );
            ApiError::forbidden("Organization is not active or does not exist")
        })?;

    if !organization.enabled {
        tracing::warn!("Organization validation failed: {} is disabled", organization.name);
        return Err(ApiError::forbidden("Organization is disabled"));
    }

    tracing::debug!("Organization validated: {} ({})", organization.name, organization.id);

    request.extensions_mut().insert(CurrentOrganization(organization));
    request.extensions_mut().insert(DbPool(pool));
    Ok(next.run(request).await)
}
