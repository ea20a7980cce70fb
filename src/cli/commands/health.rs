use crate::cli::client::ApiClient;
use crate::cli::OutputFormat;

pub async fn handle(client: &ApiClient, output_format: OutputFormat) -> anyhow::Result<()> {
    let reply = client.probe("/health").await?;

    match output_format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reply.body)?),
        OutputFormat::Text => {
            let data = reply.data();
            let field = |name: &str| data.get(name).and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
            println!("Status:    {}", field("status"));
            println!("Database:  {}", field("database"));
            if let Some(sessions) = data.get("websocketSessions") {
                println!("WebSocket: {} session(s)", sessions);
            }
        }
    }

    if !reply.status.is_success() {
        anyhow::bail!("server unhealthy ({})", reply.status);
    }
    Ok(())
}
