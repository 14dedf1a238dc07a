use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use postrelay_backend::api;
use postrelay_backend::config::Config;
use postrelay_backend::gemini::keys::KeyManager;
use postrelay_backend::gemini::{GeminiClient, ImageService};
use postrelay_backend::idempotency::{self, IdempotencyStore};
use postrelay_backend::mail::SmtpMailer;
use postrelay_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration first so the log level default can come from it
    let config = Config::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    tracing::info!("Starting PostRelay Backend...");
    tracing::info!(
        host = %config.server_host,
        port = %config.server_port,
        provider_keys = config.gemini_api_keys.len(),
        model = %config.gemini_model,
        "Configuration loaded"
    );

    // Core stores
    let idempotency = IdempotencyStore::new();
    let keys = Arc::new(KeyManager::new(config.gemini_api_keys.clone()));

    // Provider client and image service
    let provider = Arc::new(GeminiClient::new(&config)?);
    let images = ImageService::new(&config, keys.clone(), provider);

    // Mailer
    let mailer = Arc::new(SmtpMailer::new());

    let state = AppState::new(config.clone(), idempotency, keys, mailer, images);

    // Background sweep keeps the idempotency map bounded
    tokio::spawn(idempotency::run_sweeper(state.idempotency.clone()));

    // Build router
    let app = Router::new()
        .merge(api::create_router(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.server_addr().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    // Run server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Handle shutdown signals
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
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
