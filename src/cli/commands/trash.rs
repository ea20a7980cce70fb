use clap::Subcommand;
use uuid::Uuid;

use crate::cli::client::ApiClient;
use crate::cli::utils::{output_rows, output_success};
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum TrashCommands {
    #[command(about = "List restorable entries (admin)")]
    List {
        #[arg(long = "type", help = "USER, DEVICE or ORGANIZATION")]
        entity_type: Option<String>,
    },

    #[command(about = "Restore a soft-deleted entity (admin)")]
    Restore {
        #[arg(help = "Trash entry id")]
        id: Uuid,
    },
}

pub async fn handle(client: &ApiClient, cmd: TrashCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TrashCommands::List { entity_type } => {
            let path = match entity_type {
                Some(kind) => format!("/api/v1/admin/trash?type={}", kind.to_uppercase()),
                None => "/api/v1/admin/trash".to_string(),
            };
            let reply = client.get(&path).await?;
            output_rows(
                output_format,
                reply.data(),
                &["id", "entity_type", "entity_name", "deleted_by", "days_remaining"],
                "Trash is empty",
            )
        }
        TrashCommands::Restore { id } => {
            let reply = client
                .post::<()>(&format!("/api/v1/admin/trash/{}/restore", id), None)
                .await?;
            output_success(output_format, &format!("Restored {}", id), Some(reply.data().clone()))
        }
    }
}
