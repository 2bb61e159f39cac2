use nila_bearer::prelude::*;
use nila_bearer::service;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(TrustConfig::from_env()?);
    let settings = ServerSettings::from_env()?;
    info!(
        discovery = %config.discovery_url(),
        issuers = ?config.issuers,
        audiences = ?config.audiences,
        required_role = %config.required_role,
        "Loaded trust configuration"
    );

    let state = AppState::new(config)?;
    // Warms the key-set cache immediately and keeps it fresh.
    let refresh_task = state.verifier.key_set_cache().spawn_refresh_task();

    let app = service::app(state, &settings);
    let listener = TcpListener::bind(settings.bind_addr).await?;
    info!("reports-api listening on {}", settings.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresh_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
