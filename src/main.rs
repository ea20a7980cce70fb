use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use indcloud_api::app::{router, AppState};
use indcloud_api::config::{config, Environment};
use indcloud_api::database::DatabaseManager;
use indcloud_api::realtime::TelemetryHub;
use indcloud_api::{mqtt, scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    let default_filter = Environment::from_env().default_log_filter();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let config = config();
    tracing::info!("Starting IndCloud API in {:?} mode", config.environment);
    if config.security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set outside development");
    }

    if config.database.run_migrations {
        DatabaseManager::migrate().await.context("database migration failed")?;
    }

    let state = AppState::new(Arc::new(TelemetryHub::new()));

    if config.scheduler.enabled || config.mqtt.enabled {
        let pool = DatabaseManager::main_pool().await.context("database unavailable")?;
        if config.scheduler.enabled {
            let jobs = scheduler::start(&config.scheduler, pool.clone(), state.limiters());
            tracing::info!("Started {} scheduled jobs", jobs.len());
        }
        if config.mqtt.enabled {
            mqtt::client::spawn(config.mqtt.clone(), pool, state.hub.clone());
        }
    }

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("IndCloud API listening on http://{}", bind_addr);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    DatabaseManager::close().await;
    tracing::info!("IndCloud API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
