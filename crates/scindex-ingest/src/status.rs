//! Observable pipeline state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Controller state machine.
///
/// `Idle → Running ⇄ Paused`, `Running → Idle`, and
/// `Idle → Reclassifying → Idle` (optionally straight on to `Running`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
  #[default]
  Idle,
  Running,
  Paused,
  Reclassifying,
}

impl PipelineState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Idle => "idle",
      Self::Running => "running",
      Self::Paused => "paused",
      Self::Reclassifying => "reclassifying",
    }
  }
}

/// Progress snapshot published by the controller and scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatus {
  pub state:      PipelineState,
  /// Height most recently processed (indexed or skipped).
  pub height:     Option<u64>,
  /// Greatest completed height.
  pub last_index: u64,
  /// Last chain tip seen, if any.
  pub chain_tip:  Option<u64>,
  /// `"memory"` or `"disk"`.
  pub mode:       String,
  pub last_error: Option<String>,
  pub updated_at: DateTime<Utc>,
}

impl ScanStatus {
  pub fn new(mode: &str, last_index: u64) -> Self {
    Self {
      state: PipelineState::Idle,
      height: None,
      last_index,
      chain_tip: None,
      mode: mode.to_owned(),
      last_error: None,
      updated_at: Utc::now(),
    }
  }

  pub fn started(&self) -> bool {
    matches!(self.state, PipelineState::Running | PipelineState::Paused)
  }

  pub fn paused(&self) -> bool { self.state == PipelineState::Paused }

  pub fn reclassifying(&self) -> bool { self.state == PipelineState::Reclassifying }
}
