//! Versioned contract variables.
//!
//! Every observed store-variable write becomes a [`VariableSnapshot`] tagged
//! with the topoheight at which it was seen. Snapshots are never updated; the
//! value of a variable at height `H` is the snapshot with the greatest
//! topoheight `<= H`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::contract::Scid;

// ─── Keys and values ─────────────────────────────────────────────────────────

/// A contract variable name. Contracts may key their store by string or by
/// unsigned integer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarKey {
  Uint(u64),
  String(String),
}

/// A contract variable value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
  Uint(u64),
  String(String),
}

macro_rules! text_or_uint {
  ($ty:ident) => {
    impl $ty {
      /// Interpret free text (e.g. a query parameter): anything that parses
      /// as `u64` is numeric, everything else is a string.
      pub fn parse_lossy(s: &str) -> Self {
        match s.parse::<u64>() {
          Ok(n) => Self::Uint(n),
          Err(_) => Self::String(s.to_owned()),
        }
      }

      /// Single-character kind tag stored alongside the text form.
      pub fn kind(&self) -> &'static str {
        match self {
          Self::Uint(_) => "u",
          Self::String(_) => "s",
        }
      }

      pub fn as_str(&self) -> Option<&str> {
        match self {
          Self::String(s) => Some(s),
          Self::Uint(_) => None,
        }
      }

      pub fn as_u64(&self) -> Option<u64> {
        match self {
          Self::Uint(n) => Some(*n),
          Self::String(_) => None,
        }
      }
    }

    impl fmt::Display for $ty {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
          Self::Uint(n) => write!(f, "{n}"),
          Self::String(s) => f.write_str(s),
        }
      }
    }

    impl From<&str> for $ty {
      fn from(s: &str) -> Self { Self::String(s.to_owned()) }
    }

    impl From<String> for $ty {
      fn from(s: String) -> Self { Self::String(s) }
    }

    impl From<u64> for $ty {
      fn from(n: u64) -> Self { Self::Uint(n) }
    }
  };
}

text_or_uint!(VarKey);
text_or_uint!(VarValue);

// ─── Snapshots ───────────────────────────────────────────────────────────────

/// One observed write of `key` under `scid` at `topoheight`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSnapshot {
  pub scid:       Scid,
  pub key:        VarKey,
  pub value:      VarValue,
  pub topoheight: u64,
}

/// A resolved variable (key and its value at some height), as returned by
/// point-in-time reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScVariable {
  pub key:   VarKey,
  pub value: VarValue,
}

/// Values (or keys) split by kind, as returned by the by-key and by-value
/// searches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitValues {
  pub strings: Vec<String>,
  pub uints:   Vec<u64>,
}

impl SplitValues {
  pub fn push_key(&mut self, key: VarKey) {
    match key {
      VarKey::String(s) => self.strings.push(s),
      VarKey::Uint(n) => self.uints.push(n),
    }
  }

  pub fn push_value(&mut self, value: VarValue) {
    match value {
      VarValue::String(s) => self.strings.push(s),
      VarValue::Uint(n) => self.uints.push(n),
    }
  }

  pub fn is_empty(&self) -> bool { self.strings.is_empty() && self.uints.is_empty() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_lossy_prefers_numbers() {
    assert_eq!(VarKey::parse_lossy("42"), VarKey::Uint(42));
    assert_eq!(VarKey::parse_lossy("nameHdr"), VarKey::String("nameHdr".into()));
    assert_eq!(VarValue::parse_lossy("-1"), VarValue::String("-1".into()));
  }

  #[test]
  fn untagged_json_shape() {
    let v: VarValue = serde_json::from_str("9").unwrap();
    assert_eq!(v, VarValue::Uint(9));
    let v: VarValue = serde_json::from_str("\"9\"").unwrap();
    assert_eq!(v, VarValue::String("9".into()));
    assert_eq!(serde_json::to_string(&VarKey::from("count")).unwrap(), "\"count\"");
  }

  #[test]
  fn split_values_sorts_into_buckets() {
    let mut split = SplitValues::default();
    split.push_value(VarValue::from("a"));
    split.push_value(VarValue::from(3));
    assert_eq!(split.strings, ["a"]);
    assert_eq!(split.uints, [3]);
    assert!(!split.is_empty());
  }
}
