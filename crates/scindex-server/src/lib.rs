//! Server wiring for scindex: configuration, the JSON-RPC chain client, and
//! the HTTP application.

pub mod error;
pub mod rpc;

pub use error::Error;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use axum::Router;
use scindex_core::{
  layout::{DataLayout, Network, expand_tilde},
  settings::RuntimeSettings,
  store::IndexStore,
};
use scindex_ingest::{IndexerHandle, PipelineConfig, RetryPolicy};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `scindex.toml` and
/// `SCINDEX_*` environment variables.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
  pub host:             String,
  pub port:             u16,
  pub data_dir:         PathBuf,
  pub network:          Network,
  /// Start forward scanning as soon as the server is up.
  pub autostart:        bool,
  pub poll_interval_ms: u64,
  pub max_retries:      u32,
  pub retry_base_ms:    u64,
  pub retry_cap_ms:     u64,
  /// Flush a memory-mode index every this many heights; 0 disables.
  pub flush_interval:   u64,
  pub rpc_timeout_ms:   u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    let retry = RetryPolicy::default();
    Self {
      host:             "127.0.0.1".to_string(),
      port:             8099,
      data_dir:         PathBuf::from("datashards"),
      network:          Network::Mainnet,
      autostart:        false,
      poll_interval_ms: 2_000,
      max_retries:      retry.max_retries,
      retry_base_ms:    retry.base_ms,
      retry_cap_ms:     retry.cap_ms,
      flush_interval:   1_000,
      rpc_timeout_ms:   10_000,
    }
  }
}

/// Command-line values that take precedence over the file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
  pub port:      Option<u16>,
  pub data_dir:  Option<PathBuf>,
  pub testnet:   bool,
  pub autostart: bool,
}

impl ServerConfig {
  /// Layer defaults, the optional TOML file at `path`, `SCINDEX_*`
  /// environment variables, then `overrides`.
  pub fn load(path: &Path, overrides: &Overrides) -> Result<Self, config::ConfigError> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path.to_path_buf()).required(false))
      .add_source(config::Environment::with_prefix("SCINDEX").try_parsing(true))
      .set_override_option("port", overrides.port)?
      .set_override_option(
        "data_dir",
        overrides.data_dir.as_ref().map(|p| p.to_string_lossy().into_owned()),
      )?
      .set_override_option("network", overrides.testnet.then_some("testnet"))?
      .set_override_option("autostart", overrides.autostart.then_some(true))?
      .build()?;

    let mut cfg: ServerConfig = settings.try_deserialize()?;
    cfg.data_dir = expand_tilde(&cfg.data_dir);
    Ok(cfg)
  }

  pub fn layout(&self) -> DataLayout { DataLayout::new(&self.data_dir, self.network) }

  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      poll_interval: Duration::from_millis(self.poll_interval_ms),
      retry:         RetryPolicy {
        max_retries: self.max_retries,
        base_ms:     self.retry_base_ms,
        cap_ms:      self.retry_cap_ms,
      },
      flush_every:   self.flush_interval,
    }
  }

  pub fn rpc_timeout(&self) -> Duration { Duration::from_millis(self.rpc_timeout_ms) }

  /// Fallback runtime settings for this network.
  pub fn default_runtime(&self) -> RuntimeSettings {
    RuntimeSettings {
      endpoints: vec![self.network.default_endpoint().to_owned()],
      ..RuntimeSettings::default()
    }
  }

  pub fn bind_address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

// ─── Application ─────────────────────────────────────────────────────────────

/// The API router wrapped in request tracing.
pub fn app<S>(store: Arc<S>, indexer: IndexerHandle) -> Router
where
  S: IndexStore + 'static,
{
  scindex_api::api_router(store, indexer).layer(TraceLayer::new_for_http())
}
