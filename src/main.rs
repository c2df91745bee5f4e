//! edgegate — reverse proxy entry point.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌────────────────────────────────────────────────────┐
//!                    │                     EDGEGATE                       │
//!                    │                                                    │
//!   Client Request   │  ┌──────────┐   ┌──────────┐   ┌───────────────┐  │
//!   ─────────────────┼─▶│ security │──▶│ balancer │──▶│    breaker    │  │
//!                    │  │   gate   │   │ (select) │   │  (per origin) │  │
//!                    │  └──────────┘   └──────────┘   └───────┬───────┘  │
//!                    │                                        │          │
//!                    │                                        ▼          │
//!   Client Response  │  ┌────────────────────────────────────────────┐   │
//!   ◀────────────────┼──│  forwarders: http │ websocket │ sse        │◀──┼── Origin
//!                    │  └────────────────────────────────────────────┘   │    pool
//!                    │                                                    │
//!                    │  ┌────────────────────────────────────────────┐   │
//!                    │  │ cross-cutting: config, observability,      │   │
//!                    │  │ lifecycle (shutdown)                       │   │
//!                    │  └────────────────────────────────────────────┘   │
//!                    └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;

use edgegate::config::{load_config, ProxyConfig};
use edgegate::lifecycle::Shutdown;
use edgegate::observability::{logging, metrics};
use edgegate::proxy::ProxyServer;

/// Reverse proxy fronting a fixed pool of origin servers.
#[derive(Debug, Parser)]
#[command(name = "edgegate", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability.log_level);
    tracing::info!(
        bind_address = %config.listener.bind_address,
        origins = config.origins.len(),
        strategy = ?config.balancer.strategy,
        "Configuration loaded"
    );

    let metrics_handle = if config.observability.metrics_enabled {
        Some(metrics::install_recorder())
    } else {
        None
    };

    let listener = match TcpListener::bind(&config.listener.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(
                bind_address = %config.listener.bind_address,
                error = %e,
                "Failed to bind listener"
            );
            return ExitCode::FAILURE;
        }
    };

    let server = match ProxyServer::new(config, metrics_handle) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize proxy");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    shutdown.trigger_on_ctrl_c();

    if let Err(e) = server.run(listener, server_shutdown).await {
        tracing::error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }

    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
