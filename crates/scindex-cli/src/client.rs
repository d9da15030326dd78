//! Async HTTP client wrapping the scindex JSON API.

use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

use scindex_core::{
  contract::{ContractSummary, Scid},
  variable::ScVariable,
};

/// Body of a control endpoint reply.
#[derive(Debug, Deserialize)]
struct ControlReply {
  status:    bool,
  #[serde(default)]
  error_msg: Option<String>,
}

/// Async HTTP client for the scindex API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client:   Client,
  base_url: String,
}

impl ApiClient {
  pub fn new(base_url: impl Into<String>) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, base_url: base_url.into() })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/{path}", self.base_url.trim_end_matches('/'))
  }

  /// `GET /<path>?<query>` and decode the JSON body. Error bodies carry an
  /// `error_msg`, which becomes the error text.
  async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
    let resp = self
      .client
      .get(self.url(path))
      .query(query)
      .send()
      .await
      .with_context(|| format!("GET /{path} failed"))?;

    let status = resp.status();
    if !status.is_success() {
      let body: Value = resp.json().await.unwrap_or(Value::Null);
      let msg = body["error_msg"].as_str().unwrap_or("no error message");
      return Err(anyhow!("GET /{path} → {status}: {msg}"));
    }
    resp.json().await.with_context(|| format!("deserialising /{path}"))
  }

  async fn control(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
    let reply: ControlReply = self.get(path, query).await?;
    if reply.status {
      Ok(())
    } else {
      Err(anyhow!(reply.error_msg.unwrap_or_else(|| format!("{path} refused"))))
    }
  }

  // ── Control ───────────────────────────────────────────────────────────────

  /// `GET /Info`
  pub async fn info(&self) -> Result<Value> { self.get("Info", &[]).await }

  pub async fn start(&self) -> Result<()> { self.control("Start", &[]).await }

  pub async fn pause(&self) -> Result<()> { self.control("Pause", &[]).await }

  pub async fn resume(&self) -> Result<()> { self.control("Resume", &[]).await }

  pub async fn reclassify(&self, autostart: bool) -> Result<()> {
    self.control("Reclassify", &[("autostart", autostart.to_string())]).await
  }

  /// Save a new RAM budget on the server; it applies from its next run.
  pub async fn set_ram_size(&self, mb: u64) -> Result<()> {
    self.control("SetRamSize", &[("mb", mb.to_string())]).await
  }

  // ── Queries ───────────────────────────────────────────────────────────────

  pub async fn last_index_height(&self) -> Result<u64> { self.get("GetLastIndexHeight", &[]).await }

  /// Variables of `scid` at `height`, or at the last indexed height.
  pub async fn variables(&self, scid: Scid, height: Option<u64>) -> Result<Vec<ScVariable>> {
    let mut query = vec![("scid", scid.to_hex())];
    if let Some(height) = height {
      query.push(("height", height.to_string()));
    }
    self.get("GetSCIDVariableDetailsAtTopoheight", &query).await
  }

  pub async fn initial_code(&self, scid: Scid) -> Result<String> {
    self.get("GetInitialSCIDCode", &[("scid", scid.to_hex())]).await
  }

  pub async fn scids_by_class(&self, classes: &[String]) -> Result<Vec<Scid>> {
    let query: Vec<_> = classes.iter().map(|c| ("class", c.clone())).collect();
    self.get("GetSCIDsByClass", &query).await
  }

  pub async fn scs_by_tags(&self, tags: &[String]) -> Result<BTreeMap<Scid, ContractSummary>> {
    let query: Vec<_> = tags.iter().map(|t| ("tags", t.clone())).collect();
    self.get("GetSCsByTags", &query).await
  }

  pub async fn classes(&self) -> Result<Vec<String>> { self.get("GetClasses", &[]).await }

  pub async fn tags(&self) -> Result<Vec<String>> { self.get("GetTags", &[]).await }

  /// `GET /GetTelaIndexes`
  pub async fn tela_indexes(&self) -> Result<Value> { self.get("GetTelaIndexes", &[]).await }

  /// Contracts owned by `owner`.
  pub async fn scids_by_owner(&self, owner: &str) -> Result<Vec<Scid>> {
    let all: BTreeMap<Scid, String> = self.get("GetAllOwnersAndSCIDs", &[]).await?;
    Ok(all.into_iter().filter(|(_, o)| o == owner).map(|(scid, _)| scid).collect())
  }
}
