//! Real-time Forum Hub - Entry Point
//!
//! Loads configuration, starts the Hub actor, and accepts connections.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use forum_hub::{handle_connection, AppError, Config, Hub, MemoryStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=forum_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("forum_hub=info")),
        )
        .init();

    let mut config = Config::load().map_err(|e| {
        error!("Failed to load config: {}", e);
        e
    })?;

    // Bind address from the command line wins over the environment
    if let Some(addr) = env::args().nth(1) {
        config.addr = addr;
    }
    let config = Arc::new(config);

    let store = match &config.seed_file {
        Some(path) => Arc::new(MemoryStore::load_seed(path)?),
        None => {
            warn!("No FORUM_SEED_FILE set, starting with an empty store");
            Arc::new(MemoryStore::new())
        }
    };

    // Start TCP listener
    let listener = TcpListener::bind(&config.addr).await?;
    info!(
        "Forum hub listening on ws://{}{}",
        config.addr, config.ws_path
    );

    // Create Hub actor and start
    let (hub, server) = Hub::new(store.clone());
    tokio::spawn(server.run());

    info!("Hub actor started");

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let hub = hub.clone();
                let sessions = store.clone();
                let config = config.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    match handle_connection(stream, hub, sessions, config).await {
                        Ok(()) | Err(AppError::Unauthorized) => {}
                        Err(e) => error!("Connection handler error: {}", e),
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
