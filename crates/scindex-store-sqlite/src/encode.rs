//! Encoding and decoding helpers between Rust domain types and the plain
//! representations stored in SQLite columns.
//!
//! SCIDs are stored as lowercase hex. Heights are `INTEGER`, saturating at
//! `i64::MAX` so "latest" sentinels such as `u64::MAX` still compare
//! correctly. Variable keys and values are stored as a one-letter kind plus
//! their text form.

use scindex_core::{
  contract::{ContractRecord, Scid},
  variable::{ScVariable, VarKey, VarValue, VariableSnapshot},
};

use crate::{Error, Result};

// ─── Scid ────────────────────────────────────────────────────────────────────

pub fn encode_scid(scid: Scid) -> String { scid.to_hex() }

pub fn decode_scid(s: &str) -> Result<Scid> {
  s.parse().map_err(|_| Error::Corrupt(format!("scid {s:?}")))
}

// ─── Heights ─────────────────────────────────────────────────────────────────

pub fn encode_height(h: u64) -> i64 { i64::try_from(h).unwrap_or(i64::MAX) }

pub fn decode_height(h: i64) -> Result<u64> {
  u64::try_from(h).map_err(|_| Error::Corrupt(format!("negative height {h}")))
}

// ─── Keys and values ─────────────────────────────────────────────────────────

pub fn encode_key(k: &VarKey) -> (&'static str, String) { (k.kind(), k.to_string()) }

pub fn decode_key(kind: &str, text: String) -> Result<VarKey> {
  match kind {
    "s" => Ok(VarKey::String(text)),
    "u" => text
      .parse()
      .map(VarKey::Uint)
      .map_err(|_| Error::Corrupt(format!("numeric key {text:?}"))),
    other => Err(Error::Corrupt(format!("unknown key kind {other:?}"))),
  }
}

pub fn encode_value(v: &VarValue) -> (&'static str, String) { (v.kind(), v.to_string()) }

pub fn decode_value(kind: &str, text: String) -> Result<VarValue> {
  match kind {
    "s" => Ok(VarValue::String(text)),
    "u" => text
      .parse()
      .map(VarValue::Uint)
      .map_err(|_| Error::Corrupt(format!("numeric value {text:?}"))),
    other => Err(Error::Corrupt(format!("unknown value kind {other:?}"))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw columns read directly from a `contracts` row.
pub struct RawContract {
  pub scid:       String,
  pub owner:      String,
  pub height:     i64,
  pub class:      String,
  pub tags:       String,
  pub code:       Option<String>,
  pub class_only: bool,
}

impl RawContract {
  pub const COLUMNS: &'static str = "scid, owner, height, class, tags, code, class_only";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      scid:       row.get(0)?,
      owner:      row.get(1)?,
      height:     row.get(2)?,
      class:      row.get(3)?,
      tags:       row.get(4)?,
      code:       row.get(5)?,
      class_only: row.get(6)?,
    })
  }

  pub fn into_record(self) -> Result<ContractRecord> {
    Ok(ContractRecord {
      scid:       decode_scid(&self.scid)?,
      owner:      self.owner,
      height:     decode_height(self.height)?,
      class:      self.class,
      tags:       self.tags,
      code:       self.code,
      class_only: self.class_only,
    })
  }
}

/// Raw columns read directly from a `variables` row.
pub struct RawVariable {
  pub scid:       String,
  pub key_kind:   String,
  pub key:        String,
  pub value_kind: String,
  pub value:      String,
  pub topoheight: i64,
}

impl RawVariable {
  pub const COLUMNS: &'static str = "scid, key_kind, key, value_kind, value, topoheight";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      scid:       row.get(0)?,
      key_kind:   row.get(1)?,
      key:        row.get(2)?,
      value_kind: row.get(3)?,
      value:      row.get(4)?,
      topoheight: row.get(5)?,
    })
  }

  pub fn into_snapshot(self) -> Result<VariableSnapshot> {
    Ok(VariableSnapshot {
      scid:       decode_scid(&self.scid)?,
      key:        decode_key(&self.key_kind, self.key)?,
      value:      decode_value(&self.value_kind, self.value)?,
      topoheight: decode_height(self.topoheight)?,
    })
  }

  pub fn into_variable(self) -> Result<ScVariable> {
    Ok(ScVariable {
      key:   decode_key(&self.key_kind, self.key)?,
      value: decode_value(&self.value_kind, self.value)?,
    })
  }
}
