//! On-disk layout shared by the server and the CLI.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which chain an index belongs to. Networks never share an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
  #[default]
  Mainnet,
  Testnet,
}

impl Network {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Mainnet => "mainnet",
      Self::Testnet => "testnet",
    }
  }

  /// Node endpoint used when no `Endpoints` setting is saved.
  pub fn default_endpoint(&self) -> &'static str {
    match self {
      Self::Mainnet => "127.0.0.1:10102",
      Self::Testnet => "127.0.0.1:40402",
    }
  }
}

/// `<data_dir>/<network>/scindexdb/{index.db,settings.db}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
  pub dir:         PathBuf,
  pub index_db:    PathBuf,
  pub settings_db: PathBuf,
}

impl DataLayout {
  pub fn new(data_dir: &Path, network: Network) -> Self {
    let dir = data_dir.join(network.as_str()).join("scindexdb");
    Self {
      index_db: dir.join("index.db"),
      settings_db: dir.join("settings.db"),
      dir,
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn networks_get_separate_directories() {
    let main = DataLayout::new(Path::new("/data"), Network::Mainnet);
    let test = DataLayout::new(Path::new("/data"), Network::Testnet);
    assert_eq!(main.index_db, PathBuf::from("/data/mainnet/scindexdb/index.db"));
    assert_eq!(test.settings_db, PathBuf::from("/data/testnet/scindexdb/settings.db"));
    assert_ne!(main.dir, test.dir);
  }

  #[test]
  fn relative_paths_are_left_alone() {
    assert_eq!(expand_tilde(Path::new("datashards")), PathBuf::from("datashards"));
  }
}
