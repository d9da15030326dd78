//! Handlers for the pipeline control endpoints.
//!
//! | Path | Notes |
//! |------|-------|
//! | `/Info` | state, coverage and size snapshot |
//! | `/Start` | `{status:true}` once running |
//! | `/Pause` | refused unless running |
//! | `/Resume` | refused unless paused |
//! | `/Reclassify` | `?autostart`; refused unless idle |
//! | `/SetRamSize` | `?mb`; saved for the next run |

use axum::{
  Json,
  extract::State,
};
use scindex_core::store::IndexStore;
use serde::Serialize;

use crate::{ApiState, error::ApiError, params::Params};

#[derive(Debug, Serialize)]
pub struct InfoResponse {
  pub started:       bool,
  pub paused:        bool,
  pub reclassifying: bool,
  pub last_index:    u64,
  /// Number of completed heights.
  pub indexed_count: u64,
  /// Heights below `last_index` that are not indexed, as inclusive ranges.
  pub gaps:          Vec<[u64; 2]>,
  pub chain_tip:     Option<u64>,
  /// Percentage of heights `0..=chain_tip` indexed; absent until the tip is
  /// known.
  pub progress:      Option<f64>,
  pub size_bytes:    u64,
  pub state:         &'static str,
  pub mode:          String,
  pub last_error:    Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
  pub status: bool,
}

const OK: StatusResponse = StatusResponse { status: true };

/// `GET /Info`
pub async fn info<S: IndexStore>(State(state): State<ApiState<S>>) -> Result<Json<InfoResponse>, ApiError> {
  let status = state.indexer.latest_status();
  let ranges = state.store.completed_ranges().await.map_err(ApiError::store)?;
  let size_bytes = state.store.size_bytes().await.map_err(ApiError::store)?;
  let indexed_count = ranges.indexed_count();
  Ok(Json(InfoResponse {
    started: status.started(),
    paused: status.paused(),
    reclassifying: status.reclassifying(),
    last_index: ranges.last_index(),
    indexed_count,
    gaps: ranges.gaps(),
    chain_tip: status.chain_tip,
    progress: status.chain_tip.map(|tip| progress_percent(indexed_count, tip)),
    size_bytes,
    state: status.state.as_str(),
    mode: status.mode,
    last_error: status.last_error,
  }))
}

/// `indexed` out of the `tip + 1` heights up to `tip`, in percent rounded to
/// two decimals.
fn progress_percent(indexed: u64, tip: u64) -> f64 {
  let heights = tip.saturating_add(1) as f64;
  let percent = (indexed as f64 / heights * 100.0).min(100.0);
  (percent * 100.0).round() / 100.0
}

/// `GET /Start`
pub async fn start<S: IndexStore>(State(state): State<ApiState<S>>) -> Result<Json<StatusResponse>, ApiError> {
  state.indexer.start().await?;
  Ok(Json(OK))
}

/// `GET /Pause`
pub async fn pause<S: IndexStore>(State(state): State<ApiState<S>>) -> Result<Json<StatusResponse>, ApiError> {
  state.indexer.pause().await?;
  Ok(Json(OK))
}

/// `GET /Resume`
pub async fn resume<S: IndexStore>(State(state): State<ApiState<S>>) -> Result<Json<StatusResponse>, ApiError> {
  state.indexer.resume().await?;
  Ok(Json(OK))
}

/// `GET /Reclassify[?autostart=true]`
pub async fn reclassify<S: IndexStore>(
  State(state): State<ApiState<S>>,
  params: Params,
) -> Result<Json<StatusResponse>, ApiError> {
  let autostart = params.flag("autostart")?;
  state.indexer.reclassify(autostart).await?;
  tracing::info!(autostart, "reclassification requested over HTTP");
  Ok(Json(OK))
}

/// `GET /SetRamSize?mb=`
pub async fn set_ram_size<S: IndexStore>(
  State(state): State<ApiState<S>>,
  params: Params,
) -> Result<Json<StatusResponse>, ApiError> {
  let mb = params.uint("mb")?;
  state.indexer.set_ram_size(mb).await?;
  tracing::info!(ram_size_mb = mb, "RAM budget changed over HTTP");
  Ok(Json(OK))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn progress_is_a_rounded_percentage() {
    assert_eq!(progress_percent(0, 0), 0.0);
    assert_eq!(progress_percent(1, 0), 100.0);
    assert_eq!(progress_percent(50, 99), 50.0);
    assert_eq!(progress_percent(1, 2), 33.33);
    assert_eq!(progress_percent(500, 99), 100.0);
  }
}
