//! QZRelay - Entry Point
//!
//! Local-network broadcast relay. Lines read from stdin are broadcast to
//! every connected peer; messages peers send back are logged.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, info};

use qzrelay::{Config, RelayServer, VERSION};

/// Application entry point
#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    // Load configuration, falling back to defaults when no file exists
    let config = if config_path.exists() {
        Config::load(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        Config::default()
    };

    // Initialize tracing/logging
    qzrelay::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        "Starting QZRelay"
    );

    // Create and start the server
    let server = RelayServer::new(Arc::new(config));
    server.start().context("Relay failed to start")?;

    // Log messages peers send back
    if let Some(mut inbound) = server.take_inbound() {
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                info!(from = %msg.from, text = %msg.text, "Peer message");
            }
        });
    }

    // Broadcast stdin lines until shutdown
    tokio::select! {
        result = broadcast_stdin(server.clone()) => {
            if let Err(e) = result {
                debug!(error = %e, "Stdin closed");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    server.shutdown();
    info!("Relay stopped");
    Ok(())
}

/// Read lines from stdin and broadcast each to all connected peers
async fn broadcast_stdin(server: Arc<RelayServer>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let queued = server.broadcast(&line);
        debug!(queued, "Broadcast from stdin");
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
