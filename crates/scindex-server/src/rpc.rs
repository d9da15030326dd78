//! JSON-RPC 2.0 chain client.
//!
//! Several endpoints may be configured; a failed call moves on to the next
//! one and the endpoint that answered becomes the preferred one for later
//! calls.
//!
//! # Endpoint contract
//!
//! The configured endpoints are block adapters: a node-side proxy that
//! decodes raw blocks and transactions before answering. Both methods are
//! called at `<endpoint>/json_rpc`.
//!
//! `DERO.GetHeight` with `{}` returns at least `{"topoheight": u64}`.
//!
//! `DERO.GetBlock` with `{"height": u64}` returns the block at that
//! topoheight with its smart-contract transactions already decoded:
//!
//! ```json
//! {
//!   "topoheight": 7,
//!   "transactions": [
//!     {
//!       "txid": "<hex>",
//!       "signer": "<address>",
//!       "install": { "scid": "<64 hex>", "code": "<source>" },
//!       "writes": [ { "key": "count", "value": 5 } ]
//!     },
//!     {
//!       "txid": "<hex>",
//!       "signer": "<address>",
//!       "invoke": { "scid": "<64 hex>", "args": [ { "name": "entrypoint", "value": "Bump" } ] },
//!       "writes": []
//!     }
//!   ]
//! }
//! ```
//!
//! `transactions` may be omitted for blocks without contract activity. A
//! transaction carries either `install` or `invoke`; `writes` lists the
//! store-variable writes it made, and keys and values are strings or
//! unsigned integers. Each entry is handed to the scanner unchanged and
//! decoded there, so a malformed entry is skipped without failing the block.
//! A reply for a different topoheight is rejected as malformed.

use std::{
  sync::atomic::{AtomicU64, AtomicUsize, Ordering},
  time::Duration,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};

use scindex_core::chain::{Block, ChainSource, RawTransaction};

use crate::error::{Error, Result};

pub const METHOD_GET_HEIGHT: &str = "DERO.GetHeight";
pub const METHOD_GET_BLOCK: &str = "DERO.GetBlock";

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse<R> {
  result: Option<R>,
  error:  Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
  #[serde(default)]
  code:    i64,
  #[serde(default)]
  message: String,
}

#[derive(Debug, Deserialize)]
struct HeightResult {
  topoheight: u64,
}

#[derive(Debug, Serialize)]
struct BlockParams {
  height: u64,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
  topoheight:   u64,
  #[serde(default)]
  transactions: Vec<Value>,
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// [`ChainSource`] backed by one or more node endpoints.
pub struct RpcChainSource {
  client:    reqwest::Client,
  urls:      Vec<String>,
  preferred: AtomicUsize,
  next_id:   AtomicU64,
}

/// `host:port` becomes `http://host:port/json_rpc`; full URLs only gain the
/// path when it is missing.
pub fn endpoint_url(endpoint: &str) -> String {
  let base = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
    endpoint.trim_end_matches('/').to_owned()
  } else {
    format!("http://{}", endpoint.trim_end_matches('/'))
  };
  if base.ends_with("/json_rpc") { base } else { format!("{base}/json_rpc") }
}

impl RpcChainSource {
  pub fn new(endpoints: &[String], timeout: Duration) -> Result<Self> {
    if endpoints.is_empty() {
      return Err(Error::NoEndpoints);
    }
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self {
      client,
      urls: endpoints.iter().map(|e| endpoint_url(e)).collect(),
      preferred: AtomicUsize::new(0),
      next_id: AtomicU64::new(1),
    })
  }

  pub fn urls(&self) -> &[String] { &self.urls }

  /// Call `method`, trying every endpoint once starting with the preferred
  /// one. Returns the last error when all of them fail.
  async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
  where
    P: Serialize + ?Sized,
    R: DeserializeOwned,
  {
    let start = self.preferred.load(Ordering::Relaxed);
    let mut last_err = Error::NoEndpoints;

    for offset in 0..self.urls.len() {
      let idx = (start + offset) % self.urls.len();
      match self.call_at(idx, method, params).await {
        Ok(result) => {
          if idx != start {
            tracing::info!(endpoint = %self.urls[idx], "switched node endpoint");
            self.preferred.store(idx, Ordering::Relaxed);
          }
          return Ok(result);
        }
        Err(e) => {
          tracing::debug!(endpoint = %self.urls[idx], method, error = %e, "rpc call failed");
          last_err = e;
        }
      }
    }
    Err(last_err)
  }

  async fn call_at<P, R>(&self, idx: usize, method: &str, params: &P) -> Result<R>
  where
    P: Serialize + ?Sized,
    R: DeserializeOwned,
  {
    let payload = json!({
      "jsonrpc": "2.0",
      "id": self.next_id.fetch_add(1, Ordering::Relaxed),
      "method": method,
      "params": params,
    });

    let response: RpcResponse<R> = self
      .client
      .post(&self.urls[idx])
      .json(&payload)
      .send()
      .await?
      .error_for_status()?
      .json()
      .await?;

    match (response.result, response.error) {
      (_, Some(err)) => Err(Error::Rpc { code: err.code, message: err.message }),
      (Some(result), None) => Ok(result),
      (None, None) => Err(Error::Malformed(format!("{method}: neither result nor error"))),
    }
  }
}

impl ChainSource for RpcChainSource {
  type Error = Error;

  async fn tip_height(&self) -> Result<u64> {
    let result: HeightResult = self.call(METHOD_GET_HEIGHT, &json!({})).await?;
    Ok(result.topoheight)
  }

  async fn fetch_block(&self, height: u64) -> Result<Block> {
    let result: BlockResult = self.call(METHOD_GET_BLOCK, &BlockParams { height }).await?;
    if result.topoheight != height {
      return Err(Error::Malformed(format!(
        "asked for height {height}, node returned {}",
        result.topoheight
      )));
    }

    let transactions = result
      .transactions
      .into_iter()
      .map(|body| RawTransaction {
        txid: body
          .get("txid")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_owned(),
        body,
      })
      .collect();
    Ok(Block { height, transactions })
  }
}
