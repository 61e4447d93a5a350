//! jobmesh meta-server daemon
//!
//! Keeps the directory of worker servers in its subnets. Workers register
//! themselves on startup; configured subnets are scanned once at startup.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jm_core::MeshConfig;
use jm_meta::MetaServer;

#[derive(Parser)]
#[command(name = "jm-meta")]
#[command(about = "jobmesh meta-server daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not scan the configured subnets at startup
    #[arg(long)]
    no_collect: bool,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("jobmesh meta-server starting...");

    let mut config = MeshConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.meta.port = port;
    }

    let server = MetaServer::start(config, !args.no_collect)
        .await
        .context("Failed to start meta-server")?;
    let stop = server.shutdown_token();

    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install signal handler")?;

    #[cfg(unix)]
    let terminated = terminate.recv();
    #[cfg(not(unix))]
    let terminated = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C, initiating shutdown..."),
        _ = terminated => tracing::info!("Received SIGTERM, initiating shutdown..."),
        _ = stop.cancelled() => tracing::info!("Shutdown requested"),
    }

    server.shutdown().await;
    tracing::info!("Meta-server shutdown complete");
    Ok(())
}
