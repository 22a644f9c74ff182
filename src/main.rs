use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pathgate::{Config, Dispatcher};

#[derive(Parser, Debug)]
#[command(name = "pathgate")]
#[command(about = "Path-prefix dispatching HTTP reverse proxy")]
struct Args {
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    #[arg(long)]
    validate_config: bool,

    /// Override the configured listen host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = Config::load(&args.config).await?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if args.validate_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let dispatcher = Arc::new(Dispatcher::new(&config)?);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(
        "Starting pathgate on {} with {} route(s), default backend {}:{}",
        addr,
        config.routes.len(),
        config.default_backend.host,
        config.default_backend.port
    );

    let server_task = tokio::spawn(async move {
        if let Err(e) = dispatcher.serve(listener).await {
            error!("Server error: {}", e);
        }
    });

    // Handle shutdown gracefully
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = server_task => {
            error!("Server task exited unexpectedly");
        }
    }

    info!("pathgate shutdown complete");
    Ok(())
}
