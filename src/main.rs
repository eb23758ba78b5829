//! Image relay server.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌───────────────────────────────────────────────┐
//!                       │                 IMAGE RELAY                   │
//!     Client Request    │  ┌─────────┐   ┌─────────┐   ┌────────────┐   │
//!     ──────────────────┼─▶│  http   │──▶│ address │──▶│  upstream  │───┼───▶ Origin
//!                       │  │ server  │   │  guard  │   │  fetcher   │   │
//!                       │  └─────────┘   └─────────┘   └─────┬──────┘   │
//!                       │                                    │          │
//!     Client Response   │  ┌─────────┐   ┌────────────┐      │          │
//!     ◀─────────────────┼──│ bounded │◀──│   header   │◀─────┘          │
//!                       │  │ stream  │   │ translator │                 │
//!                       │  └─────────┘   └────────────┘                 │
//!                       └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use image_relay::config::loader::load_config;
use image_relay::lifecycle::signals::wait_for_shutdown_signal;
use image_relay::observability::{logging, metrics};
use image_relay::{HttpServer, RelayConfig, Shutdown};

#[derive(Parser)]
#[command(name = "image-relay")]
#[command(about = "Relay remote images without exposing internal networks", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!("image-relay v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_image_size = config.relay.max_image_size,
        connect_timeout_secs = config.timeouts.connect_secs,
        read_timeout_secs = config.timeouts.read_secs,
        max_redirects = config.relay.max_redirects,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let grace = Duration::from_secs(config.timeouts.request_secs);
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config);
    let tracker = server.tracker();
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        result = &mut server_task => {
            result??;
            return Ok(());
        }
        _ = wait_for_shutdown_signal() => shutdown.trigger(),
    }

    server_task.await??;
    shutdown.drain(&tracker, grace).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
