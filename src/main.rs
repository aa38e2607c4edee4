use anyhow::Context;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use haven_api::config::{config, Environment};
use haven_api::database::{DatabaseManager, Stores};
use haven_api::{app, AppState};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("haven_api=info,tower_http=info")),
        )
        .init();

    let config = config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    tracing::info!("Starting Haven API in {:?} mode", config.environment);

    let (stores, database) = match &config.database.url {
        Some(_) => {
            let manager = DatabaseManager::connect(&config.database)
                .await
                .context("failed to connect to PostgreSQL")?;
            tracing::info!("Using PostgreSQL stores");
            (Stores::postgres(manager.pool().clone()), Some(manager))
        }
        None if config.environment == Environment::Production => {
            anyhow::bail!("DATABASE_URL is required in production");
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores (data is lost on restart)");
            (Stores::in_memory(), None)
        }
    };

    let state = AppState::new(config.clone(), stores, database.clone());

    let maintenance = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            maintenance.run_maintenance();
        }
    });

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Haven API listening on http://{}", bind_addr);

    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(db) = database {
        db.close().await;
    }
    tracing::info!("Haven API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
