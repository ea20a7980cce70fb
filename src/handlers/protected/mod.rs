// handlers/protected/mod.rs - handlers behind the JWT stack
//
// Route prefix: /api/v1
// Middleware: jwt_auth -> validate_organization -> validate_user
//
// Every handler reads the caller's organization from `AuthUser` and the
// pool from the `DbPool` extension; nothing crosses organizations.

pub mod data;
pub mod devices;
pub mod events;
pub mod expression_functions;
pub mod global_rules;
pub mod rules;
pub mod synthetic_variables;
pub mod variables;
