use axum::{extract::Request, middleware::Next, response::Response};

use super::auth::AuthUser;
use super::validate_organization::DbPool;
use crate::database::models::User;
use crate::error::ApiError;

/// The calling user, re-read from the database for this request
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// Checks that the token's user exists, is enabled and belongs to its organization
pub async fn validate_user_middleware(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before user validation"))?;

    let DbPool(pool) = request
        .extensions()
        .get::<DbPool>()
        .cloned()
        .ok_or_else(|| ApiError::internal_server_error("Database pool required before user validation"))?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND deleted_at IS NULL")
        .bind(auth_user.user_id)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Database error validating user {}: {}", auth_user.user_id, e);
            ApiError::internal_server_error("Failed to validate user")
        })?
        .ok_or_else(|| {
            tracing::warn!("User validation failed: {} ({}) not found", auth_user.username, auth_user.user_id);
            ApiError::forbidden(format!("User '{}' is not active", auth_user.username))
        })?;

    if user.organization_id != auth_user.organization_id {
        tracing::warn!(
            "User validation failed: {} does not belong to organization {}",
            user.username,
            auth_user.organization_id
        );
        return Err(ApiError::forbidden("User organization mismatch"));
    }

    if !user.enabled {
        tracing::warn!("User validation failed: {} is disabled", user.username);
        return Err(ApiError::forbidden("User account is disabled"));
    }

    tracing::debug!("User validated: {} in organization {}", user.username, user.organization_id);

    // Role checks downstream see the stored roles, not the ones minted into the token
    let refreshed = AuthUser {
        roles: user.roles.clone(),
        ..auth_user
    };
    request.extensions_mut().insert(refreshed);
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

/// Gate for the admin tier; runs after `validate_user_middleware`
pub async fn require_admin_middleware(request: Request, next: Next) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required"))?;

    if let Err(e) = auth_user.require_admin() {
        tracing::warn!(
            "Admin access denied for {} on {}",
            auth_user.username,
            request.uri().path()
        );
        return Err(e);
    }
    Ok(next.run(request).await)
}
