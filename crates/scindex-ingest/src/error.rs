//! Error type for `scindex-ingest`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The command is not valid in the pipeline's current state.
  #[error("{0}")]
  Busy(&'static str),

  /// The controller task has exited.
  #[error("indexer is not running")]
  Stopped,

  #[error(transparent)]
  Store(#[from] scindex_store_sqlite::Error),

  #[error(transparent)]
  Core(#[from] scindex_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
