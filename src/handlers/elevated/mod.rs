// handlers/elevated/mod.rs - administrative handlers
//
// Route prefix: /api/v1/admin
// Middleware: the protected stack plus require_admin (ROLE_ADMIN or
// ROLE_SUPER_ADMIN). A few operations additionally require
// ROLE_SUPER_ADMIN and check it in the handler.

pub mod organizations;
pub mod retention;
pub mod trash;
pub mod users;
