use serde_json::json;

use crate::cli::client::ApiClient;
use crate::cli::utils::{output_success, parse_readings};
use crate::cli::OutputFormat;

pub async fn handle(
    client: &ApiClient,
    device: &str,
    key: &str,
    values: &[String],
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    let readings = parse_readings(values)?;
    let count = readings.len();
    client
        .post_with_api_key(&format!("/api/v1/ingest/{}", device), key, &readings)
        .await?;

    output_success(
        output_format,
        &format!("Sent {} reading(s) for {}", count, device),
        Some(json!({ "deviceId": device, "variables": readings })),
    )
}
