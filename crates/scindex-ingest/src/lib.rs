//! The ingestion pipeline: scans the chain, classifies contracts, and feeds
//! the index store under the control of a single controller actor.

pub mod backoff;
pub mod controller;
pub mod error;
mod scanner;
pub mod status;
pub mod step;

use std::path::Path;

use scindex_store_sqlite::{SqliteStore, StorageMode, mode::file_size_mb};

pub use backoff::RetryPolicy;
pub use controller::{Command, IndexerHandle, PipelineConfig, spawn_indexer};
pub use error::{Error, Result};
pub use status::{PipelineState, ScanStatus};

/// Open the index at `path`, choosing memory or disk mode from the existing
/// file size and the RAM budget.
pub async fn open_index_store(path: impl AsRef<Path>, ram_size_mb: u64) -> Result<SqliteStore> {
  let path = path.as_ref();
  let mode = StorageMode::select(file_size_mb(path), ram_size_mb);
  tracing::info!(mode = mode.label(), path = %path.display(), ram_size_mb, "opening index store");
  Ok(SqliteStore::open_with_mode(path, mode).await?)
}
