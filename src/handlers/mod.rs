// handlers/mod.rs - HTTP handlers by security tier
//
// public    no user JWT (service info, health, device ingestion)
// protected JWT + live organization + enabled user (/api/v1/*)
// elevated  protected plus ROLE_ADMIN (/api/v1/admin/*)

pub mod elevated;
pub mod protected;
pub mod public;
