use std::sync::Arc;

use anyhow::Result;
use mission_common::{MemoryBroker, RedisBroker, StreamBroker, create_pool};
use mission_config::Config;
use mission_gateway::{AppState, create_router};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; it decides the log format
    let config = Config::from_env()?;

    match config.log_format.as_str() {
        "json" => mission_common::init_tracing_json(),
        _ => mission_common::init_tracing(),
    }

    info!("Starting Mission Control gateway...");
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server_host, config.server_port
    );

    // Create database connection pool and apply migrations
    let pool = create_pool(&config.database_url, config.database_max_connections).await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Database migrations completed");

    // Pick the stream broker backend
    let broker: Arc<dyn StreamBroker> = match &config.broker_url {
        Some(url) => Arc::new(RedisBroker::connect(url).await?),
        None => {
            info!("BROKER_URL not set; using the in-process stream broker");
            Arc::new(MemoryBroker::new())
        }
    };

    if !config.agents.is_empty() {
        info!("Chat proxy configured for {} agent(s)", config.agents.len());
    }

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(pool, broker, config)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            warn!("Received terminate signal, shutting down...");
        },
    }
}
