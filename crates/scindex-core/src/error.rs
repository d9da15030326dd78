//! Error types for `scindex-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The chain client failed to return a block or the tip height.
  #[error("chain read failed at height {height}: {reason}")]
  ChainRead { height: u64, reason: String },

  /// The in-memory store exceeded its RAM budget. The write was rolled back
  /// and must be retried against the disk-backed store.
  #[error("storage full: in-memory budget of {budget_mb} MB exceeded")]
  StorageFull { budget_mb: u64 },

  /// A single transaction payload could not be decoded.
  #[error("malformed payload in tx {txid}: {reason}")]
  Parse { txid: String, reason: String },

  /// Malformed filter or settings configuration.
  #[error("configuration error: {0}")]
  Config(String),

  #[error("invalid scid {0:?}: expected 64 hex characters")]
  InvalidScid(String),

  #[error("serialization error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
