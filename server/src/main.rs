//! Switchboard Server - Main Entry Point
//!
//! Call signaling and presence backend.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use sb_server::{
    api,
    call::{CallRecordSink, RedisSink, TracingSink},
    config,
    presence::PresenceRegistry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sb_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ring_timeout_secs = config.ring_timeout.as_secs(),
        "Starting Switchboard Server"
    );

    // Call records go to Redis when configured, otherwise to the log
    let sink: Arc<dyn CallRecordSink> = match &config.redis_url {
        Some(url) => match RedisSink::connect(url, config.call_record_channel.clone()).await {
            Ok(sink) => {
                info!(channel = %config.call_record_channel, "Publishing call records to Redis");
                Arc::new(sink)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, logging call records instead");
                Arc::new(TracingSink)
            }
        },
        None => Arc::new(TracingSink),
    };

    // Build application state
    let state = api::AppState::new(config.clone(), PresenceRegistry::in_memory(), sink);

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
