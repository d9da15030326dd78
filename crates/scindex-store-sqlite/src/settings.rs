//! [`SettingsStore`] is the key-value settings file kept next to the index.
//!
//! Holds operator settings (`RamSizeMB`, `Filters`, `Endpoints`) that must
//! survive reclassification and memory-mode restarts. Progress markers
//! (`completed`, `reclassify_target`) live in the index database instead so
//! they commit together with the rows they describe.

use std::{collections::BTreeMap, path::Path};

use rusqlite::{OptionalExtension as _, params};

use scindex_core::settings::{RuntimeSettings, keys};

use crate::{Result, schema::SETTINGS_SCHEMA};

#[derive(Clone)]
pub struct SettingsStore {
  conn: tokio_rusqlite::Connection,
}

impl SettingsStore {
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    if let Some(parent) = path.as_ref().parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SETTINGS_SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(Self { conn })
  }

  pub async fn load(&self, key: &str) -> Result<Option<String>> {
    let key = key.to_owned();
    let value = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?,
        )
      })
      .await?;
    Ok(value)
  }

  pub async fn save(&self, key: &str, value: &str) -> Result<()> {
    let (key, value) = (key.to_owned(), value.to_owned());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO settings (key, value) VALUES (?1, ?2)
           ON CONFLICT(key) DO UPDATE SET value = excluded.value",
          params![key, value],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  pub async fn delete(&self, key: &str) -> Result<()> {
    let key = key.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Every stored setting, by key.
  pub async fn all(&self) -> Result<BTreeMap<String, String>> {
    let pairs = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<(String, String)>>>()?)
      })
      .await?;
    Ok(pairs.into_iter().collect())
  }

  /// Resolve the stored settings on top of `last_good`.
  ///
  /// Malformed values are logged and replaced by the `last_good` value.
  pub async fn runtime_settings(&self, last_good: &RuntimeSettings) -> Result<RuntimeSettings> {
    let ram = self.load(keys::RAM_SIZE_MB).await?;
    let filters = self.load(keys::FILTERS).await?;
    let endpoints = self.load(keys::ENDPOINTS).await?;

    let (settings, warnings) = RuntimeSettings::resolve(
      last_good,
      ram.as_deref(),
      filters.as_deref(),
      endpoints.as_deref(),
    );
    for warning in warnings {
      tracing::warn!(error = %warning, "ignoring malformed setting");
    }
    Ok(settings)
  }
}

#[cfg(test)]
mod tests {
  use scindex_core::filter::{FilterRule, encode_filter_config};

  use super::*;

  #[tokio::test]
  async fn save_load_delete() {
    let s = SettingsStore::open_in_memory().await.unwrap();
    assert_eq!(s.load(keys::RAM_SIZE_MB).await.unwrap(), None);

    s.save(keys::RAM_SIZE_MB, "256").await.unwrap();
    s.save(keys::RAM_SIZE_MB, "512").await.unwrap();
    assert_eq!(s.load(keys::RAM_SIZE_MB).await.unwrap().as_deref(), Some("512"));
    assert_eq!(s.all().await.unwrap().len(), 1);

    s.delete(keys::RAM_SIZE_MB).await.unwrap();
    assert_eq!(s.load(keys::RAM_SIZE_MB).await.unwrap(), None);
  }

  #[tokio::test]
  async fn runtime_settings_fall_back_per_key() {
    let s = SettingsStore::open_in_memory().await.unwrap();
    let mut filters = BTreeMap::new();
    filters.insert("g45".to_owned(), FilterRule::new(["G45-NFT"]));
    s.save(keys::FILTERS, &encode_filter_config(&filters).unwrap()).await.unwrap();
    s.save(keys::RAM_SIZE_MB, "lots").await.unwrap();
    s.save(keys::ENDPOINTS, "node-a:10102, node-b:10102").await.unwrap();

    let last_good = RuntimeSettings { ram_size_mb: 64, ..RuntimeSettings::default() };
    let resolved = s.runtime_settings(&last_good).await.unwrap();

    assert_eq!(resolved.ram_size_mb, 64);
    assert_eq!(resolved.filters, filters);
    assert_eq!(resolved.endpoints, vec!["node-a:10102", "node-b:10102"]);
  }
}
