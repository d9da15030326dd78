//! The chain boundary.
//!
//! [`ChainSource`] is implemented by whatever talks to a node (the server's
//! JSON-RPC client, or a fixture chain in tests). Blocks arrive with their
//! transactions still in raw JSON form; [`ChainTx::decode`] turns each one
//! into the contract action and variable writes the pipeline cares about.
//! Decoding is per transaction so one malformed payload never costs the rest
//! of the block.
//!
//! Decoded transaction shape:
//!
//! ```json
//! {
//!   "txid":   "…",
//!   "signer": "dero1…",
//!   "install": { "scid": "<64 hex>", "code": "Function Initialize() …" },
//!   "writes": [ { "key": "owner", "value": "dero1…" }, { "key": 0, "value": 5 } ]
//! }
//! ```
//!
//! An invocation carries `"invoke": { "scid": "…", "args": [ { "name": "entrypoint", "value": "Swap" } ] }`
//! instead of `install`; a transaction with neither is ignored.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  contract::Scid,
  variable::{VarKey, VarValue},
};

// ─── Raw blocks ──────────────────────────────────────────────────────────────

/// A block as returned by the chain client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
  /// Topoheight of the block.
  pub height:       u64,
  #[serde(default)]
  pub transactions: Vec<RawTransaction>,
}

/// A transaction whose body has not been decoded yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
  pub txid: String,
  pub body: serde_json::Value,
}

// ─── Decoded transactions ────────────────────────────────────────────────────

/// A named invocation argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScArg {
  pub name:  String,
  pub value: VarValue,
}

/// A store-variable write observed in the transaction's execution trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableWrite {
  pub key:   VarKey,
  pub value: VarValue,
}

/// What a transaction does to contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxAction {
  Install { scid: Scid, code: String },
  Invoke { scid: Scid, args: Vec<ScArg> },
  /// Plain transfers and anything else without contract interaction.
  Other,
}

/// A decoded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTx {
  pub txid:   String,
  pub signer: String,
  pub action: TxAction,
  pub writes: Vec<VariableWrite>,
}

#[derive(Deserialize)]
struct InstallBody {
  scid: Scid,
  #[serde(default)]
  code: String,
}

#[derive(Deserialize)]
struct InvokeBody {
  scid: Scid,
  #[serde(default)]
  args: Vec<ScArg>,
}

#[derive(Deserialize)]
struct TxBody {
  #[serde(default)]
  signer:  String,
  install: Option<InstallBody>,
  invoke:  Option<InvokeBody>,
  #[serde(default)]
  writes:  Vec<VariableWrite>,
}

impl ChainTx {
  /// Decode a raw transaction. Failures are [`Error::Parse`] scoped to this
  /// transaction.
  pub fn decode(raw: &RawTransaction) -> Result<Self> {
    let parse_err = |reason: String| Error::Parse { txid: raw.txid.clone(), reason };

    let body: TxBody =
      serde_json::from_value(raw.body.clone()).map_err(|e| parse_err(e.to_string()))?;

    let action = match (body.install, body.invoke) {
      (Some(_), Some(_)) => {
        return Err(parse_err("transaction both installs and invokes".into()));
      }
      (Some(i), None) => TxAction::Install { scid: i.scid, code: i.code },
      (None, Some(i)) => TxAction::Invoke { scid: i.scid, args: i.args },
      (None, None) => TxAction::Other,
    };

    Ok(Self { txid: raw.txid.clone(), signer: body.signer, action, writes: body.writes })
  }

  /// The contract this transaction touches, if any.
  pub fn scid(&self) -> Option<Scid> {
    match &self.action {
      TxAction::Install { scid, .. } | TxAction::Invoke { scid, .. } => Some(*scid),
      TxAction::Other => None,
    }
  }
}

// ─── Source trait ────────────────────────────────────────────────────────────

/// Read access to the chain.
pub trait ChainSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Current chain tip (greatest available topoheight).
  fn tip_height(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Fetch the block at `height` with its transactions.
  fn fetch_block(
    &self,
    height: u64,
  ) -> impl Future<Output = Result<Block, Self::Error>> + Send + '_;
}
