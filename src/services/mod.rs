pub mod alert_service;
pub mod data_retention_service;
pub mod device_health_service;
pub mod device_service;
pub mod device_token_service;
pub mod event_service;
pub mod global_rule;
pub mod organization_service;
pub mod rule_service;
pub mod synthetic_variable_service;
pub mod telemetry_service;
pub mod trash_service;
pub mod user_service;
pub mod variable_service;

pub use alert_service::AlertService;
pub use data_retention_service::DataRetentionService;
pub use device_health_service::DeviceHealthService;
pub use device_service::DeviceService;
pub use device_token_service::DeviceTokenService;
pub use event_service::{EventDraft, EventService};
pub use global_rule::GlobalRuleService;
pub use organization_service::OrganizationService;
pub use rule_service::{RuleEngine, RuleService};
pub use synthetic_variable_service::SyntheticVariableService;
pub use telemetry_service::{TelemetryPayload, TelemetryService};
pub use trash_service::TrashService;
pub use user_service::UserService;
pub use variable_service::VariableService;

use crate::database::DatabaseError;
use crate::expression::ExpressionError;

/// Error shared by the domain services. Each variant maps to one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    AccessDenied(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
    #[error("Database manager error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ServiceError::BadRequest(message.into())
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        ServiceError::AccessDenied(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ServiceError::Unauthorized(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }

    /// Turn a unique violation into a 409 with a domain message
    pub fn on_unique_violation(err: sqlx::Error, message: impl Into<String>) -> Self {
        if is_unique_violation(&err) {
            ServiceError::Conflict(message.into())
        } else {
            ServiceError::Sqlx(err)
        }
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

pub type ServiceResult<T> = Result<T, ServiceError>;
