//! Live telemetry push to browser sessions.

pub mod hub;
pub mod websocket;

pub use hub::TelemetryHub;
pub use websocket::telemetry_ws;
