//! # Relay Server
//!
//! Socket.IO server over Engine.IO long-polling.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relay
//!
//! # Run with a config file in the working directory
//! cp relay.toml . && relay
//!
//! # Run with environment variables
//! RELAY__PORT=8080 RELAY__HOST=0.0.0.0 RELAY__ENGINE__PING_INTERVAL_MS=10000 relay
//! ```

mod config;
mod handlers;
mod metrics;
mod socket;

use anyhow::Result;
use std::sync::Arc;
use tenvis_relay_core::{ChannelDispatcher, MemoryStore, SharedClock, SharedStore, SystemClock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,tenvis_relay_core=debug,tenvis_relay_transport=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    info!("Starting Relay server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let clock: SharedClock = Arc::new(SystemClock);
    let store: SharedStore = Arc::new(MemoryStore::new(clock.clone()));
    let dispatcher = ChannelDispatcher::new(EVENT_CHANNEL_CAPACITY);
    let state = Arc::new(handlers::AppState::new(
        config.clone(),
        store,
        clock,
        Arc::new(dispatcher),
    ));

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    let mut daemons = Vec::new();
    if config.heartbeat.enabled {
        let heartbeat = state.heartbeat();
        let token = token.clone();
        daemons.push(tokio::spawn(async move {
            heartbeat.run(token, metrics::record_heartbeat).await
        }));
    }
    if config.cleanup.enabled {
        let cleanup = state.cleanup();
        let token = token.clone();
        daemons.push(tokio::spawn(async move {
            cleanup.run(token, metrics::record_cleanup).await
        }));
    }

    // Start the server
    handlers::run_server(state, token.clone()).await?;
    token.cancel();

    for daemon in daemons {
        match daemon.await {
            Ok(sweeps) => info!(sweeps, "Daemon stopped"),
            Err(e) => error!("Daemon task failed: {}", e),
        }
    }

    info!("Relay server stopped");
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining");
    token.cancel();
}
