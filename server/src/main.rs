//! Civic issue prediction server
//!
//! Serves a trained civic classifier over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use civic_core::{init_logging, LogConfig, LogLevel};
use civic_server::{build_router, AppState, ModelClassifier, ServerConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "civic-server")]
#[command(version)]
#[command(about = "HTTP prediction endpoint for the civic issue classifier")]
struct Cli {
    /// Host to bind to
    #[arg(long, env = "CIVIC_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "CIVIC_PORT", default_value = "5001")]
    port: u16,

    /// Model artifact stem (`<stem>.mpk` and `<stem>.json`)
    #[arg(short, long, env = "CIVIC_MODEL", default_value = "saved_models_v2/disaster_model_v2")]
    model: PathBuf,

    /// Directory for per-request upload files (system temp dir if unset)
    #[arg(long, env = "CIVIC_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Maximum request body size in MiB
    #[arg(long, env = "CIVIC_MAX_UPLOAD_MB", default_value = "32")]
    max_upload_mb: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CIVIC_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: LogLevel::from_name(&cli.log_level),
        ..LogConfig::default()
    };
    init_logging(&log_config)?;

    let mut config = ServerConfig {
        host: cli.host,
        port: cli.port,
        model_stem: cli.model,
        max_upload_bytes: cli.max_upload_mb.saturating_mul(1024 * 1024),
        ..ServerConfig::default()
    };
    if let Some(temp_dir) = cli.temp_dir {
        config.temp_dir = temp_dir;
    }
    std::fs::create_dir_all(&config.temp_dir)
        .with_context(|| format!("Failed to create temp dir {:?}", config.temp_dir))?;

    info!("Civic Server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:    {}", civic_training::backend_name());
    info!("  Model:      {:?}", config.model_stem);
    info!("  Temp dir:   {:?}", config.temp_dir);
    info!("  Body limit: {} bytes", config.max_upload_bytes);

    let classifier = ModelClassifier::load(&config.model_stem)
        .with_context(|| format!("Failed to load model from {:?}", config.model_stem))?;
    info!("Model loaded");

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid host/port")?;
    let app = build_router(Arc::new(AppState::new(config, Arc::new(classifier))));

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
