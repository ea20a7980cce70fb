pub mod client;
pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use client::ApiClient;

#[derive(Parser)]
#[command(name = "indcloud")]
#[command(about = "IndCloud CLI - talk to a running IndCloud API server")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(
        long,
        global = true,
        env = "INDCLOUD_URL",
        default_value = "http://localhost:8080",
        help = "Server base URL"
    )]
    pub url: String,

    #[arg(long, global = true, env = "INDCLOUD_TOKEN", hide_env_values = true, help = "Bearer token")]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Send one reading with a device API key")]
    Ingest {
        #[arg(help = "External device id")]
        device: String,
        #[arg(long, help = "Device API key (X-API-Key)")]
        key: String,
        #[arg(required = true, help = "Readings as name=value")]
        values: Vec<String>,
    },

    #[command(about = "Device management")]
    Devices {
        #[command(subcommand)]
        cmd: commands::devices::DeviceCommands,
    },

    #[command(about = "Soft-deleted entities")]
    Trash {
        #[command(subcommand)]
        cmd: commands::trash::TrashCommands,
    },

    #[command(about = "Development tokens")]
    Token {
        #[command(subcommand)]
        cmd: commands::token::TokenCommands,
    },

    #[command(about = "Check server health from the /health endpoint")]
    Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json && !cli.text {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let client = ApiClient::new(&cli.url, cli.token.clone())?;

    match cli.command {
        Commands::Ingest { device, key, values } => {
            commands::ingest::handle(&client, &device, &key, &values, output_format).await
        }
        Commands::Devices { cmd } => commands::devices::handle(&client, cmd, output_format).await,
        Commands::Trash { cmd } => commands::trash::handle(&client, cmd, output_format).await,
        Commands::Token { cmd } => commands::token::handle(cmd, output_format),
        Commands::Health => commands::health::handle(&client, output_format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ingest_with_readings() {
        let cli = Cli::try_parse_from([
            "indcloud",
            "--json",
            "ingest",
            "pump-7",
            "--key",
            "5b0e6c9e-1a52-4c1e-9a34-0e7d3c0f9a11",
            "pressure=2.4",
            "flow=11",
        ])
        .unwrap();
        assert_eq!(OutputFormat::from_cli(&cli), OutputFormat::Json);
        match cli.command {
            Commands::Ingest { device, values, .. } => {
                assert_eq!(device, "pump-7");
                assert_eq!(values, vec!["pressure=2.4", "flow=11"]);
            }
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn ingest_needs_at_least_one_reading() {
        assert!(Cli::try_parse_from(["indcloud", "ingest", "pump-7", "--key", "k"]).is_err());
    }

    #[test]
    fn text_is_the_default_output() {
        let cli = Cli::try_parse_from(["indcloud", "health"]).unwrap();
        assert_eq!(OutputFormat::from_cli(&cli), OutputFormat::Text);
    }
}
