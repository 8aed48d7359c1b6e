//! scoped-session-server - Notes API with request-scoped sessions
//!
//! Every HTTP request runs in its own application context and gets one
//! SQLite session, released when the response is sent.

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod db;
mod routes;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("scoped_session_server=info".parse()?)
                .add_directive("scoped_session=info".parse()?),
        )
        .init();

    info!("scoped-session-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = config::Config::load()?;
    info!("Config loaded from {:?}", config.config_path);
    info!(
        "Database at {:?}, scope strategy: {}",
        config.database_path, config.scope_strategy
    );

    let bind = config.bind;
    let state = state::AppState::new(config)?;
    let router = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
