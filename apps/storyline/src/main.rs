mod about;
mod admin;
mod backend;
mod config;
mod errors;
mod events;
mod filters;
mod loader;
mod local_state;
mod models;
mod optimistic;
mod posts;
mod read_status;
mod reading_history;
mod resilient;
mod routes;
mod session;
mod state;
mod tags;
mod users;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::backend::RestBackend;
use crate::config::Config;
use crate::local_state::LocalStore;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Storyline gateway v{}", env!("CARGO_PKG_VERSION"));

    let backend = Arc::new(RestBackend::new(&config.backend_url, &config.backend_anon_key)?);
    info!("Backend client initialized ({})", config.backend_url);

    let local = Arc::new(LocalStore::open(&config.local_state_path));
    info!("Local state at {}", config.local_state_path);

    let state = AppState::build(config.clone(), backend, local);

    // Restore the persisted session before serving
    match state.session.init().await {
        Some(session) => info!("Resumed session for user {}", session.user.id),
        None => match state.session.auth_error() {
            Some(e) => warn!("Persisted session could not be restored: {e}"),
            None => info!("No persisted session, starting signed out"),
        },
    }
    state.sync_user();

    // Build router
    let app = build_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("127.0.0.1:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

/// Resolves on Ctrl-C, after stopping the loaders.
async fn shutdown_signal(state: AppState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    state.shutdown();
}
