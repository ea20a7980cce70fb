// handlers/public/mod.rs - handlers reachable without a user JWT
//
// Service info, health and device ingestion. Ingestion authenticates the
// device itself (API key or device token); the telemetry socket in
// `realtime` checks its own query-string token.

pub mod ingest;
pub mod root;

pub use ingest::{api_key_ingest, device_ingest};
pub use root::{health, root};
