use clap::Subcommand;

use crate::cli::client::ApiClient;
use crate::cli::utils::{output_rows, output_success};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum DeviceCommands {
    #[command(about = "List devices in your organization")]
    List {
        #[arg(long, help = "Only devices carrying this tag")]
        tag: Option<String>,
    },

    #[command(about = "Issue a new API token; the old one stops working")]
    RotateToken {
        #[arg(help = "External device id")]
        id: String,
    },
}

pub async fn handle(client: &ApiClient, cmd: DeviceCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        DeviceCommands::List { tag } => {
            let path = match tag {
                Some(tag) => format!("/api/v1/devices?tag={}", tag),
                None => "/api/v1/devices".to_string(),
            };
            let reply = client.get(&path).await?;
            output_rows(
                output_format,
                reply.data(),
                &["external_id", "name", "status", "health_score", "last_seen_at"],
                "No devices found",
            )
        }
        DeviceCommands::RotateToken { id } => {
            let reply = client
                .post::<()>(&format!("/api/v1/devices/{}/rotate-token", id), None)
                .await?;
            let data = reply.data().clone();
            if output_format == OutputFormat::Text {
                if let Some(token) = data.get("api_token").and_then(|t| t.as_str()) {
                    println!("✓ Rotated token for {}", id);
                    println!("{}", token);
                    return Ok(());
                }
            }
            output_success(output_format, &format!("Rotated token for {}", id), Some(data))
        }
    }
}
