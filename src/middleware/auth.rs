use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use uuid::Uuid;

use crate::auth::{decode_jwt, Claims};
use crate::database::models::user::{ROLE_ADMIN, ROLE_SUPER_ADMIN};
use crate::error::ApiError;

/// Caller identity taken from a verified bearer token
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub username: String,
    pub roles: Vec<String>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            organization_id: claims.org,
            username: claims.username,
            roles: claims.roles,
        }
    }
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_super_admin(&self) -> bool {
        self.has_role(ROLE_SUPER_ADMIN)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN) || self.is_super_admin()
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Administrator role required"))
        }
    }

    pub fn require_super_admin(&self) -> Result<(), ApiError> {
        if self.is_super_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Super administrator role required"))
        }
    }
}

/// Verifies the bearer token and injects `AuthUser`
pub async fn jwt_auth_middleware(headers: HeaderMap, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&headers).map_err(ApiError::unauthorized)?;
    let claims = decode_jwt(&token).map_err(|e| ApiError::unauthorized(e.to_string()))?;

    request.extensions_mut().insert(AuthUser::from(claims));
    Ok(next.run(request).await)
}

/// Bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, String> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let value = header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        Some(_) => Err("Empty JWT token".to_string()),
        None => Err("Authorization header must use Bearer token format".to_string()),
    }
}

/// `AuthUser` from the bearer token, if one is present and valid
pub fn optional_auth_user(headers: &HeaderMap) -> Option<AuthUser> {
    let token = extract_bearer_token(headers).ok()?;
    decode_jwt(&token).ok().map(AuthUser::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_extraction() {
        assert_eq!(extract_bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert_eq!(
            extract_bearer_token(&headers("Basic abc")).unwrap_err(),
            "Authorization header must use Bearer token format"
        );
        assert_eq!(extract_bearer_token(&headers("Bearer  ")).unwrap_err(), "Empty JWT token");
        assert_eq!(
            extract_bearer_token(&HeaderMap::new()).unwrap_err(),
            "Missing Authorization header"
        );
    }

    #[test]
    fn admin_roles() {
        let mut user = AuthUser {
            user_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            username: "u".into(),
            roles: vec!["ROLE_USER".into()],
        };
        assert!(user.require_admin().is_err());
        user.roles.push(ROLE_SUPER_ADMIN.into());
        assert!(user.is_admin());
        assert!(user.require_super_admin().is_ok());
    }
}
