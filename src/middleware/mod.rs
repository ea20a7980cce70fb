pub mod auth;
pub mod rate_limit;
pub mod response;
pub mod validate_organization;
pub mod validate_user;

pub use auth::{jwt_auth_middleware, AuthUser};
pub use rate_limit::{rate_limit_middleware, LimiterKind, RateLimiter};
pub use response::{ApiResponse, ApiResult};
pub use validate_organization::{validate_organization_middleware, CurrentOrganization, DbPool};
pub use validate_user::{require_admin_middleware, validate_user_middleware, CurrentUser};
