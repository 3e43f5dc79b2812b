use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use embedserve::api::server::{AppState, router, serve};
use embedserve::cache::ModelCache;
use embedserve::config::Config;
use embedserve::embedder::download::HuggingFaceClient;
use embedserve::preload::Preloader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, reload};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Address to listen on (overrides `bind_address`)
    #[arg(long)]
    bind: Option<String>,

    /// Directory for downloaded models (overrides `model_dir`)
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Init logging. RUST_LOG wins; otherwise start at `info` until the
    //    config file says otherwise.
    let rust_log = std::env::var("RUST_LOG").ok();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter(&filter_directive(rust_log.as_deref(), None)));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    // 2. Load config
    let mut config = Config::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }

    filter_handle
        .reload(env_filter(&filter_directive(
            rust_log.as_deref(),
            Some(config.log_level.as_str()),
        )))
        .context("failed to apply log level")?;

    config.validate().context("invalid configuration")?;
    info!("Starting embedserve {}...", env!("CARGO_PKG_VERSION"));
    info!("Model directory: {}", config.model_dir.display());

    let config = Arc::new(config);
    let shutdown = CancellationToken::new();

    // 3. Init downloader, cache and preloader
    let client = HuggingFaceClient::new(
        &config.huggingface.endpoint,
        config.huggingface.api_key.clone(),
        shutdown.child_token(),
    )?;
    let cache = Arc::new(ModelCache::new());
    let preloader = Preloader::new(cache, client, config.clone());

    // 4. Stop on Ctrl-C, aborting in-flight downloads
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            return;
        }
        info!("Shutdown requested");
        signal_token.cancel();
    });

    // 5. Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    serve(listener, router(AppState::new(preloader)), shutdown).await
}

/// Log filter directive: a non-empty `RUST_LOG`, then the configured
/// level, then `info`.
fn filter_directive(rust_log: Option<&str>, config_level: Option<&str>) -> String {
    [rust_log, config_level]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("info")
        .to_string()
}

fn env_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|e| {
        eprintln!("Invalid log filter {directive:?} ({e}), using info");
        EnvFilter::new("info")
    })
}
