//! Telemetry over MQTT: payload parsing, device authentication and the broker client.

pub mod client;
pub mod handler;
pub mod payload;

pub use handler::MqttMessageHandler;
pub use payload::{parse_payload, MqttTelemetry, PayloadError};
