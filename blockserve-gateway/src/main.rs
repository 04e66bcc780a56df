//! blockserve gateway
//!
//! Serves file, block and archive downloads over HTTP for grants issued by
//! the metadata services.

use anyhow::Context;
use blockserve_gateway::{build_router, config::GatewayConfig, metrics, AppState, ClientConnection};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockserve-gateway")]
#[command(about = "blockserve HTTP data plane")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "BLOCKSERVE_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    listen_addr: Option<String>,

    /// Root directory of the block layout
    #[arg(long)]
    blocks_dir: Option<PathBuf>,

    /// Serve from in-memory stores (development only)
    #[arg(long, default_value = "false")]
    memory_only: bool,

    /// Emit logs as JSON
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

fn init_tracing(config: &GatewayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = GatewayConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?
        .with_env_overrides()
        .with_overrides(cli.listen_addr, cli.blocks_dir, cli.memory_only, cli.json_logs);
    config.validate()?;

    init_tracing(&config);

    let addr = config.http.socket_addr()?;
    info!(
        listen = %addr,
        memory_only = config.storage.memory_only,
        buffer_size = config.streaming.buffer_size,
        "Starting blockserve gateway"
    );

    let prometheus = metrics::init_metrics();
    let state = Arc::new(AppState::from_config(config).context("Failed to open storage")?);

    let app = build_router(state).merge(metrics::routes(prometheus));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<ClientConnection>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Gateway shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
