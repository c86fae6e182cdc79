//! Connection hub server - Entry Point
//!
//! Loads configuration, starts the Hub actor and accepts WebSocket
//! connections.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chat_hub::{handle_connection, Hub, HubConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_hub=info")),
        )
        .init();

    let mut config = HubConfig::load()?;

    // Bind address from command line overrides config
    if let Some(addr) = env::args().nth(1) {
        config.bind_addr = addr;
    }
    let config = Arc::new(config);

    // Start TCP listener
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Hub listening on ws://{}", config.bind_addr);

    // Create Hub actor and start
    let (hub, handle) = Hub::channel(config.command_capacity);
    tokio::spawn(hub.run());

    if let Some(period) = config.stats_log_interval() {
        let stats_handle = handle.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let stats = stats_handle.stats();
                info!(
                    "Stats: active={} total_connections={} total_messages={}",
                    stats.active_connections, stats.total_connections, stats.total_messages
                );
            }
        });
    }

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if handle.stats().active_connections >= config.max_connections {
                    warn!("Connection limit reached, dropping {}", addr);
                    continue;
                }

                let handle = handle.clone();
                let config = Arc::clone(&config);

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, handle, config).await {
                        error!("Connection handler error for {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
