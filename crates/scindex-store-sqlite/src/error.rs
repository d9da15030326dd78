//! Error type for `scindex-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] scindex_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The in-memory database hit its page budget. The failed transaction was
  /// rolled back.
  #[error("storage full: in-memory budget of {budget_mb} MB exceeded")]
  StorageFull { budget_mb: u64 },

  #[error("store has no backing file to switch to")]
  NoBackingFile,

  /// A stored column could not be decoded back into a domain type.
  #[error("corrupt row: {0}")]
  Corrupt(String),
}

impl Error {
  pub fn is_storage_full(&self) -> bool {
    matches!(
      self,
      Error::StorageFull { .. } | Error::Core(scindex_core::Error::StorageFull { .. })
    )
  }

  /// Map SQLite's `SQLITE_FULL` to [`Error::StorageFull`].
  pub(crate) fn from_db(err: tokio_rusqlite::Error, budget_mb: Option<u64>) -> Self {
    if let (Some(budget_mb), tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))) =
      (budget_mb, &err)
      && e.code == rusqlite::ErrorCode::DiskFull
    {
      return Error::StorageFull { budget_mb };
    }
    Error::Database(err)
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
