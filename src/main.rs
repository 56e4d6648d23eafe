//! Adaptive Reverse Proxy
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                   ADAPTIVE PROXY                      │
//!                    │                                                       │
//!  Client Request    │  ┌─────────┐   ┌──────────┐   ┌──────────────────┐   │
//!  ──────────────────┼─▶│  http   │──▶│ security │──▶│  load_balancer   │   │
//!                    │  │ server  │   │rate limit│   │ weighted RR pick │   │
//!                    │  └─────────┘   └──────────┘   └────────┬─────────┘   │
//!                    │                                        │             │
//!  Client Response   │  ┌─────────┐                  ┌────────▼─────────┐   │
//!  ◀─────────────────┼──│  http   │◀─────────────────│ upstream client  │◀──┼── Endpoint
//!                    │  │ server  │   outcome ──▶ health::passive meter  │   │
//!                    │  └─────────┘                  └──────────────────┘   │
//!                    │                                                       │
//!                    │  Control plane: driver ticks the weight controller,   │
//!                    │  which reads meters and rewrites effective weights.   │
//!                    │  Cross-cutting: config (+reload), admin, lifecycle,   │
//!                    │  observability (tracing + prometheus).                │
//!                    └──────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `adaptive-proxy [CONFIG]` (or `PROXY_CONFIG=path`). Without a
//! config file the built-in defaults are used and the endpoint set starts
//! empty.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use adaptive_proxy::admin::{setup_admin_router, AdminState};
use adaptive_proxy::config::{load_config, watcher::ConfigWatcher, ProxyConfig};
use adaptive_proxy::lifecycle::{shutdown, signals, Shutdown};
use adaptive_proxy::observability::{logging, metrics};
use adaptive_proxy::{EndpointPool, HttpServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PROXY_CONFIG").ok())
        .map(PathBuf::from);

    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "adaptive-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        endpoints = config.backends.len(),
        backoff_secs = config.balancer.backoff_secs,
        request_timeout_secs = config.timeouts.request_secs,
        config = ?config_path,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Hot reload: the watcher handle must outlive the server.
    let (_watcher, config_updates) = match &config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (None, updates)
                }
            }
        }
        None => (None, mpsc::unbounded_channel().1),
    };

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let pool = Arc::new(EndpointPool::from_config(&config)?);
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config.clone(), pool.clone())?;

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let admin = setup_admin_router(AdminState::new(pool, server.shared_config()));
        let admin_shutdown = shutdown.subscribe();
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, admin)
                .with_graceful_shutdown(shutdown::wait(admin_shutdown))
                .await
            {
                tracing::error!(error = %e, "Admin API server failed");
            }
        });
    }

    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
