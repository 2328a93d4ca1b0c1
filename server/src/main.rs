use std::{fs::OpenOptions, sync::Arc};

use anyhow::Context;
use clap::Parser;
use server::{
    aggregation_listener,
    config::{AggregationMode, ServerConfig},
    routes,
    server_state::ServerState,
};
use session_tracker_data_management::DataManager;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory {}", config.log_dir.display()))?;
    let log_file = config.log_dir.join("server.log");

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=trace,session_tracker_data_management=debug,tower_http=debug", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .init();

    tracing::info!("Starting server...");

    let data_manager = if config.in_memory {
        tracing::warn!("Using the in-memory store, nothing survives a restart");
        DataManager::in_memory()
    } else {
        DataManager::start(config.database_url.as_deref())
            .await
            .context("Failed to open the database")?
    };

    let bind = config.bind;
    let mode = config.aggregation_mode;
    let window_size = config.window_size;
    let server_state = Arc::new(ServerState::new(config, data_manager));

    if mode == AggregationMode::ChangeFeed {
        aggregation_listener::spawn(server_state.pipeline.clone(), server_state.data_manager.subscribe_changes());
    }
    tracing::info!("Aggregating every {} samples, mode {:?}", window_size, mode);

    let app = routes::router(server_state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("Server stopped")?;

    Ok(())
}
