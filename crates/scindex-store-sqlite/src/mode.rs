//! Memory vs. disk backing selection.

use std::path::Path;

/// How a [`SqliteStore`](crate::SqliteStore) keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
  /// File-backed database in WAL mode. Unbounded, slower.
  Disk,
  /// In-memory database seeded from (and flushed back to) the backing file,
  /// capped at `budget_mb` megabytes. A budget of 0 means uncapped and is
  /// only used by purely in-memory stores.
  Memory { budget_mb: u64 },
}

impl StorageMode {
  /// Pick the mode for a run, once, at pipeline construction.
  ///
  /// Disk mode when no RAM budget is configured or the existing file is
  /// already larger than the budget; memory mode otherwise.
  pub fn select(file_size_mb: u64, ram_size_mb: u64) -> Self {
    if ram_size_mb == 0 || file_size_mb > ram_size_mb {
      Self::Disk
    } else {
      Self::Memory { budget_mb: ram_size_mb }
    }
  }

  pub fn is_memory(&self) -> bool { matches!(self, Self::Memory { .. }) }

  /// The enforced budget, if any.
  pub fn budget_mb(&self) -> Option<u64> {
    match self {
      Self::Memory { budget_mb } if *budget_mb > 0 => Some(*budget_mb),
      _ => None,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      Self::Disk => "disk",
      Self::Memory { .. } => "memory",
    }
  }
}

/// Size of the file at `path` in whole megabytes; 0 when it does not exist.
pub fn file_size_mb(path: impl AsRef<Path>) -> u64 {
  std::fs::metadata(path)
    .map(|m| m.len() / (1024 * 1024))
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_budget_selects_disk() {
    assert_eq!(StorageMode::select(0, 0), StorageMode::Disk);
  }

  #[test]
  fn file_larger_than_budget_selects_disk() {
    assert_eq!(StorageMode::select(300, 256), StorageMode::Disk);
  }

  #[test]
  fn file_within_budget_selects_memory() {
    let mode = StorageMode::select(100, 256);
    assert_eq!(mode, StorageMode::Memory { budget_mb: 256 });
    assert_eq!(mode.budget_mb(), Some(256));
    assert_eq!(mode.label(), "memory");
  }

  #[test]
  fn missing_file_is_zero_sized() {
    assert_eq!(file_size_mb("/definitely/not/here.db"), 0);
  }
}
