//! Traffic capture proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                  CAPTURE PROXY                        │
//!                      │                                                       │
//!  Client Request      │  ┌─────────┐    ┌──────────┐    ┌─────────────────┐  │
//!  ────────────────────┼─▶│  http   │───▶│ routing  │───▶│  request tee    │──┼──▶ Upstream
//!                      │  │ server  │    │  table   │    │ (capture repo)  │  │
//!                      │  └─────────┘    └──────────┘    └─────────────────┘  │
//!                      │                                                       │
//!  Client Response     │  ┌─────────────────┐    ┌────────────────────────┐   │
//!  ◀───────────────────┼──│ completion guard│◀───│ response tee           │◀──┼─── Upstream
//!                      │  └────────┬────────┘    └────────────────────────┘   │
//!                      │           ▼                                           │
//!                      │  ┌─────────────────┐    ┌────────────────────────┐   │
//!                      │  │ capture pipeline│───▶│ access log (sync/async)│   │
//!                      │  └─────────────────┘    │  → sinks → finalizer   │   │
//!                      │                         └────────────────────────┘   │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use traffic_capture::config::{load_config, ProxyConfig};
use traffic_capture::lifecycle::{self, Shutdown};
use traffic_capture::observability::{logging, metrics};
use traffic_capture::HttpServer;

#[derive(Parser)]
#[command(name = "traffic-capture")]
#[command(about = "HTTP proxy that captures exchanges for access logging", long_about = None)]
struct Args {
    /// Path to the TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level or filter directive, overriding the configuration
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_tracing(&config.observability, args.log_level.as_deref());
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "traffic-capture starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let services = lifecycle::start(&config)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    lifecycle::spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(&config, services.routes.clone(), services.pipeline.clone());
    server.run(listener, shutdown.subscribe()).await?;

    let grace = Duration::from_secs(config.access_log.shutdown_grace_secs);
    if !services.logger.shutdown(grace).await {
        tracing::warn!("Access log did not drain before the grace period expired");
    }

    tracing::info!(
        remaining_buffers = services.repository.active_buffers(),
        "Shutdown complete"
    );
    Ok(())
}
