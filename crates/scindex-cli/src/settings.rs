//! Local editing of the settings database.
//!
//! These commands open `settings.db` directly and never talk to the server.
//! Changes apply the next time the server starts (or, for `Filters`, on the
//! next start from idle or reclassification).

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use scindex_core::{
  filter::{FilterSet, encode_filter_config, parse_filter_config},
  settings::{keys, parse_endpoints},
};
use scindex_store_sqlite::SettingsStore;

pub async fn show(store: &SettingsStore) -> Result<BTreeMap<String, String>> {
  store.all().await.context("reading settings")
}

pub async fn set_ram(store: &SettingsStore, mb: u64) -> Result<()> {
  store
    .save(keys::RAM_SIZE_MB, &mb.to_string())
    .await
    .context("saving RamSizeMB")
}

/// Save a CSV endpoint list, or remove it with `None` to fall back to the
/// network default.
pub async fn set_endpoints(store: &SettingsStore, csv: Option<&str>) -> Result<()> {
  let Some(csv) = csv else {
    return store.delete(keys::ENDPOINTS).await.context("resetting Endpoints");
  };
  let list = parse_endpoints(csv);
  anyhow::ensure!(!list.is_empty(), "no endpoints given");
  store
    .save(keys::ENDPOINTS, &list.join(","))
    .await
    .context("saving Endpoints")
}

/// Validate the filter file by compiling it, then save it in canonical form.
/// `None` removes the setting so the built-in rules apply.
pub async fn set_filters(store: &SettingsStore, file: Option<&Path>) -> Result<()> {
  let Some(file) = file else {
    return store.delete(keys::FILTERS).await.context("resetting Filters");
  };
  let raw = std::fs::read_to_string(file)
    .with_context(|| format!("reading filter file {}", file.display()))?;
  let config = parse_filter_config(&raw).context("parsing filter file")?;
  let compiled = FilterSet::compile(&config).context("compiling filters")?;
  tracing::debug!(rules = compiled.len(), "filters validated");

  let encoded = encode_filter_config(&config)?;
  store.save(keys::FILTERS, &encoded).await.context("saving Filters")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn ram_and_endpoints_round_trip() {
    let store = SettingsStore::open_in_memory().await.unwrap();
    set_ram(&store, 256).await.unwrap();
    set_endpoints(&store, Some(" node-a:10102 ,, node-b:10102")).await.unwrap();

    let all = show(&store).await.unwrap();
    assert_eq!(all[keys::RAM_SIZE_MB], "256");
    assert_eq!(all[keys::ENDPOINTS], "node-a:10102,node-b:10102");

    assert!(set_endpoints(&store, Some(" , ")).await.is_err());
    set_endpoints(&store, None).await.unwrap();
    assert!(!show(&store).await.unwrap().contains_key(keys::ENDPOINTS));
  }

  #[tokio::test]
  async fn filters_are_validated_before_saving() {
    let store = SettingsStore::open_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{ not json").unwrap();
    assert!(set_filters(&store, Some(&bad)).await.is_err());
    assert_eq!(store.load(keys::FILTERS).await.unwrap(), None);

    let good = dir.path().join("good.json");
    std::fs::write(&good, r#"{"nft": {"tags": ["ART-NFA-MS1"]}}"#).unwrap();
    set_filters(&store, Some(&good)).await.unwrap();
    let saved = store.load(keys::FILTERS).await.unwrap().unwrap();
    assert!(parse_filter_config(&saved).unwrap().contains_key("nft"));

    set_filters(&store, None).await.unwrap();
    assert_eq!(store.load(keys::FILTERS).await.unwrap(), None);
  }
}
