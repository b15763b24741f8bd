use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use worker_ai_decode::DecoderRegistry;
use worker_ai_infer::{ClassCatalog, ModelPool};
use worker_ai_server::config::AppConfig;
use worker_ai_server::server;

/// Real-time object detection and tracking worker.
///
/// Accepts framed video frames over TCP, runs ONNX inference and
/// multi-object tracking per connection, and persists track records
/// to segmented session files.
#[derive(Parser, Debug)]
#[command(name = "worker-ai-server", version, about)]
struct Cli {
    /// Host to bind the server to
    #[arg(long)]
    bind_host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    bind_port: Option<u16>,

    /// Path to a TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Default model path, pre-warmed at startup (optional; the pool
    /// otherwise loads lazily on first Init)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Enable the debug visualizer (only meaningful with the
    /// `visualizer` feature enabled at build time)
    #[arg(long)]
    visualize: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(host) = &cli.bind_host {
        config.server.bind_host = host.clone();
    }
    if let Some(port) = cli.bind_port {
        config.server.bind_port = port;
    }
    if cli.visualize {
        config.visualization.enabled = true;
    }
    let config = std::sync::Arc::new(config);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind_host, config.server.bind_port)
        .parse()
        .context("invalid bind address")?;

    let inline_catalog = (!config.model.class_catalog.is_empty()).then(|| config.model.class_catalog.clone());
    let catalog = ClassCatalog::load(inline_catalog.as_deref(), config.model.class_catalog_path.as_deref())
        .context("loading class catalog")?;
    let catalog = std::sync::Arc::new(catalog);

    let pool = ModelPool::new(Duration::from_secs(config.server.idle_timeout_sec));
    let decoders = std::sync::Arc::new(DecoderRegistry::new());

    if let Some(model_path) = &cli.model {
        tracing::info!(path = %model_path.display(), "pre-warming default model");
        if let Err(e) = pool.load(model_path).await {
            tracing::warn!(error = %e, "failed to pre-warm default model, continuing anyway");
        }
    }

    let shared = server::Shared::new(pool, decoders, catalog, config.clone());

    tracing::info!(%bind_addr, "starting worker-ai-server");
    server::run(bind_addr, shared).await.context("server error")?;

    Ok(())
}
