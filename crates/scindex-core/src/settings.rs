//! Persisted runtime settings and their last-known-good resolution.
//!
//! Settings are plain strings in storage. [`RuntimeSettings::resolve`] turns
//! the raw values into typed ones; a malformed value never aborts startup, it
//! falls back to the previous good value and is reported as a warning.

use crate::{
  Error,
  filter::{FilterConfig, FilterSet, default_filter_config, parse_filter_config},
};

/// Setting names shared by the store, the pipeline and the control surface.
pub mod keys {
  /// JSON array of completed `[start, end]` height ranges.
  pub const COMPLETED: &str = "completed";
  /// Height an in-flight reclassification is replaying up to.
  pub const RECLASSIFY_TARGET: &str = "reclassify_target";
  /// RAM budget for the in-memory store, in megabytes.
  pub const RAM_SIZE_MB: &str = "RamSizeMB";
  /// JSON-encoded filter rule map.
  pub const FILTERS: &str = "Filters";
  /// CSV of node endpoints.
  pub const ENDPOINTS: &str = "Endpoints";
}

/// Default node endpoints used when no `Endpoints` setting is saved.
pub const DEFAULT_ENDPOINTS: &[&str] = &["127.0.0.1:10102"];

/// Typed view of the settings the pipeline reads at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
  /// RAM budget for memory mode; 0 forces disk mode.
  pub ram_size_mb: u64,
  pub filters:     FilterConfig,
  pub endpoints:   Vec<String>,
}

impl Default for RuntimeSettings {
  fn default() -> Self {
    Self {
      ram_size_mb: 0,
      filters:     default_filter_config(),
      endpoints:   DEFAULT_ENDPOINTS.iter().map(|s| (*s).to_owned()).collect(),
    }
  }
}

impl RuntimeSettings {
  /// Resolve raw setting values on top of `last_good`.
  ///
  /// Missing values keep the `last_good` value; malformed values do too, and
  /// each one yields an [`Error::Config`] in the returned warning list.
  pub fn resolve(
    last_good: &Self,
    ram_size_mb: Option<&str>,
    filters: Option<&str>,
    endpoints: Option<&str>,
  ) -> (Self, Vec<Error>) {
    let mut out = last_good.clone();
    let mut warnings = Vec::new();

    if let Some(raw) = ram_size_mb.map(str::trim).filter(|s| !s.is_empty()) {
      match raw.parse::<u64>() {
        Ok(mb) => out.ram_size_mb = mb,
        Err(e) => warnings.push(Error::Config(format!("{}: {raw:?}: {e}", keys::RAM_SIZE_MB))),
      }
    }

    if let Some(raw) = filters.filter(|s| !s.trim().is_empty()) {
      match parse_filter_config(raw).and_then(|c| FilterSet::compile(&c).map(|_| c)) {
        Ok(config) => out.filters = config,
        Err(e) => warnings.push(e),
      }
    }

    if let Some(raw) = endpoints {
      let list = parse_endpoints(raw);
      if !list.is_empty() {
        out.endpoints = list;
      }
    }

    (out, warnings)
  }
}

/// Split an `Endpoints` CSV, dropping blanks.
pub fn parse_endpoints(csv: &str) -> Vec<String> {
  csv
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_owned)
    .collect()
}
