//! scindex server binary.
//!
//! Reads `scindex.toml` (or the path given with `--config`), opens the index
//! and settings stores for the selected network, spawns the ingestion
//! pipeline against the configured node endpoints, and serves the HTTP API.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use scindex_ingest::{IndexerHandle, open_index_store, spawn_indexer};
use scindex_server::{Overrides, ServerConfig, rpc::RpcChainSource};
use scindex_store_sqlite::SettingsStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Smart-contract state indexer")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "scindex.toml")]
  config: PathBuf,

  /// Index testnet instead of mainnet.
  #[arg(long)]
  testnet: bool,

  /// Port for the HTTP API.
  #[arg(long)]
  port: Option<u16>,

  /// Root directory for the index and settings databases.
  #[arg(long)]
  data_dir: Option<PathBuf>,

  /// Start scanning immediately.
  #[arg(long)]
  autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let overrides = Overrides {
    port:      cli.port,
    data_dir:  cli.data_dir,
    testnet:   cli.testnet,
    autostart: cli.autostart,
  };
  let cfg = ServerConfig::load(&cli.config, &overrides).context("failed to load configuration")?;

  let layout = cfg.layout();
  std::fs::create_dir_all(&layout.dir)
    .with_context(|| format!("failed to create {}", layout.dir.display()))?;
  tracing::info!(network = cfg.network.as_str(), dir = %layout.dir.display(), "using data directory");

  // Runtime settings.
  let settings = SettingsStore::open(&layout.settings_db)
    .await
    .with_context(|| format!("failed to open settings at {:?}", layout.settings_db))?;
  let runtime = settings
    .runtime_settings(&cfg.default_runtime())
    .await
    .context("failed to read runtime settings")?;

  // Index store and pipeline.
  let store = open_index_store(&layout.index_db, runtime.ram_size_mb)
    .await
    .with_context(|| format!("failed to open index at {:?}", layout.index_db))?;
  let chain = RpcChainSource::new(&runtime.endpoints, cfg.rpc_timeout())
    .context("failed to build node client")?;
  tracing::info!(endpoints = ?chain.urls(), "node endpoints");

  let handle = spawn_indexer(store.clone(), settings, runtime, chain, cfg.pipeline_config())
    .await
    .context("failed to start indexer")?;
  if cfg.autostart {
    handle.start().await.context("failed to start scanning")?;
  }

  let app = scindex_server::app(Arc::new(store.clone()), handle.clone());
  let address = cfg.bind_address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  stop(&handle).await;
  store.close().await.context("failed to close index store")?;
  tracing::info!("shut down cleanly");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(error = %e, "listening for ctrl-c failed");
  }
  tracing::info!("shutdown requested");
}

/// Halt the pipeline after its in-flight height and flush the store.
async fn stop(handle: &IndexerHandle) {
  if let Err(e) = handle.shutdown().await {
    tracing::warn!(error = %e, "indexer already stopped");
  }
}
