//! Main Entrypoint for the Colloquy API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the backend gateway and the tool registry.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use colloquy_api::{
    config::Config,
    router::create_router,
    state::{AppState, drain_sessions},
};
use colloquy_core::{HttpGateway, ToolRegistry};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// How long open sessions get to send their final frame on shutdown.
const SESSION_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Waits for `Ctrl+C`, then tells every open session to wind down.
async fn shutdown_signal(shutdown_tx: Arc<watch::Sender<bool>>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
    shutdown_tx.send_replace(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let gateway = HttpGateway::new(config.gateway_config())
        .context("Failed to build the backend gateway")?;
    let tools = ToolRegistry::with_builtin_tools();
    info!(tools = ?tools.names().collect::<Vec<_>>(), "Tool registry ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let app_state = Arc::new(AppState::new(
        Arc::new(gateway),
        Arc::new(tools),
        Arc::new(config.clone()),
        shutdown_rx,
    ));

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        stt_url = %config.stt_url,
        tts_url = %config.tts_url,
        chat_url = %config.chat_url,
        provider = %config.default_provider,
        session_tools = config.session_tools,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
    .await?;

    // Upgraded websockets outlive `serve`; let them say goodbye first.
    drain_sessions(&shutdown_tx, SESSION_DRAIN_GRACE).await;

    info!("Server has shut down.");
    Ok(())
}
