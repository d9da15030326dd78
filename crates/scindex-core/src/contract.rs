//! Contract records: one row per installed smart contract.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

// ─── Scid ────────────────────────────────────────────────────────────────────

/// Content-addressed identifier of a smart contract (32 bytes, hex on the
/// wire and in the database).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scid([u8; 32]);

impl Scid {
  pub const fn from_bytes(bytes: [u8; 32]) -> Self { Self(bytes) }

  pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }

  pub fn to_hex(&self) -> String { hex::encode(self.0) }
}

impl FromStr for Scid {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let s = s.trim();
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(s, &mut bytes)
      .map_err(|_| Error::InvalidScid(s.to_owned()))?;
    Ok(Self(bytes))
  }
}

impl fmt::Display for Scid {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

impl Serialize for Scid {
  fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&self.to_hex())
  }
}

impl<'de> Deserialize<'de> for Scid {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let s = String::deserialize(d)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

// ─── ContractRecord ──────────────────────────────────────────────────────────

/// A contract that matched at least one filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
  pub scid:       Scid,
  /// Address of the installer (or first matching invoker).
  pub owner:      String,
  /// Height at which the contract entered the index.
  pub height:     u64,
  /// Name of the first matching rule; empty when unclassified.
  pub class:      String,
  /// Comma-joined, sorted set of matched tag labels.
  pub tags:       String,
  /// Install source. `None` when a class-only rule discarded it.
  pub code:       Option<String>,
  /// Set when a class-only rule matched; classification is then frozen.
  pub class_only: bool,
}

impl ContractRecord {
  pub fn summary(&self) -> ContractSummary {
    ContractSummary {
      owner:  self.owner.clone(),
      height: self.height,
      class:  self.class.clone(),
      tags:   self.tags.clone(),
    }
  }
}

/// A contract record without its source, as returned by tag searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSummary {
  pub owner:  String,
  pub height: u64,
  pub class:  String,
  pub tags:   String,
}

/// Join tag labels into the canonical stored form: sorted, de-duplicated,
/// comma-separated.
pub fn join_tags<I, S>(tags: I) -> String
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  let mut set: Vec<String> = tags
    .into_iter()
    .map(|t| t.as_ref().trim().to_owned())
    .filter(|t| !t.is_empty())
    .collect();
  set.sort();
  set.dedup();
  set.join(",")
}
