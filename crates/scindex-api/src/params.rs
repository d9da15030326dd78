//! Query-string extraction.
//!
//! Parameters are read as raw pairs so repeated keys (`?tags=a&tags=b`) are
//! kept and every parse failure is reported as an [`ApiError::BadRequest`]
//! in the API's own body shape.

use axum::{
  extract::{FromRequestParts, Query},
  http::request::Parts,
};
use scindex_core::{
  contract::Scid,
  variable::{VarKey, VarValue},
};

use crate::error::ApiError;

/// All query parameters of a request, in order.
#[derive(Debug, Clone, Default)]
pub struct Params(pub Vec<(String, String)>);

impl<S: Send + Sync> FromRequestParts<S> for Params {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
    let Query(pairs) = Query::<Vec<(String, String)>>::from_request_parts(parts, state)
      .await
      .map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(Self(pairs))
  }
}

impl Params {
  /// First value of `key`, if present and non-blank.
  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v.trim())
      .filter(|v| !v.is_empty())
  }

  /// Every non-blank value of a repeatable `key`.
  pub fn all(&self, key: &str) -> Vec<String> {
    self
      .0
      .iter()
      .filter(|(k, _)| k == key)
      .map(|(_, v)| v.trim().to_owned())
      .filter(|v| !v.is_empty())
      .collect()
  }

  pub fn require(&self, key: &str) -> Result<&str, ApiError> {
    self
      .get(key)
      .ok_or_else(|| ApiError::BadRequest(format!("missing parameter `{key}`")))
  }

  pub fn scid(&self) -> Result<Scid, ApiError> {
    let raw = self.require("scid")?;
    raw
      .parse()
      .map_err(|e| ApiError::BadRequest(format!("`scid`: {e}")))
  }

  /// `height`, defaulting to the latest height when absent.
  pub fn height(&self) -> Result<u64, ApiError> {
    match self.get("height") {
      None => Ok(u64::MAX),
      Some(raw) => raw
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("`height`: not a height: {raw:?}"))),
    }
  }

  /// `rmax`: any non-zero integer selects every match instead of the latest.
  pub fn match_all(&self) -> Result<bool, ApiError> {
    match self.get("rmax") {
      None => Ok(false),
      Some(raw) => raw
        .parse::<i64>()
        .map(|n| n != 0)
        .map_err(|_| ApiError::BadRequest(format!("`rmax`: not an integer: {raw:?}"))),
    }
  }

  /// A required unsigned integer such as `mb`.
  pub fn uint(&self, key: &str) -> Result<u64, ApiError> {
    let raw = self.require(key)?;
    parse_uint(key, raw)
  }

  /// `key`, typed by `keytype=string|uint`. Without a hint, all-digit text
  /// is read as a numeric key.
  pub fn var_key(&self) -> Result<VarKey, ApiError> {
    let raw = self.require("key")?;
    Ok(match self.kind_hint("keytype")? {
      None => VarKey::parse_lossy(raw),
      Some(Kind::String) => VarKey::String(raw.to_owned()),
      Some(Kind::Uint) => VarKey::Uint(parse_uint("key", raw)?),
    })
  }

  /// `val`, typed by `valtype=string|uint` like [`Params::var_key`].
  pub fn var_value(&self) -> Result<VarValue, ApiError> {
    let raw = self.require("val")?;
    Ok(match self.kind_hint("valtype")? {
      None => VarValue::parse_lossy(raw),
      Some(Kind::String) => VarValue::String(raw.to_owned()),
      Some(Kind::Uint) => VarValue::Uint(parse_uint("val", raw)?),
    })
  }

  fn kind_hint(&self, key: &str) -> Result<Option<Kind>, ApiError> {
    match self.get(key) {
      None => Ok(None),
      Some("string" | "s") => Ok(Some(Kind::String)),
      Some("uint" | "uint64" | "u") => Ok(Some(Kind::Uint)),
      Some(raw) => Err(ApiError::BadRequest(format!(
        "`{key}`: expected `string` or `uint`, got {raw:?}"
      ))),
    }
  }

  /// A boolean flag such as `autostart`; absent means `false`.
  pub fn flag(&self, key: &str) -> Result<bool, ApiError> {
    match self.get(key) {
      None => Ok(false),
      Some("1" | "true" | "yes") => Ok(true),
      Some("0" | "false" | "no") => Ok(false),
      Some(raw) => Err(ApiError::BadRequest(format!("`{key}`: not a boolean: {raw:?}"))),
    }
  }
}

enum Kind {
  String,
  Uint,
}

fn parse_uint(key: &str, raw: &str) -> Result<u64, ApiError> {
  raw
    .parse()
    .map_err(|_| ApiError::BadRequest(format!("`{key}`: not an unsigned integer: {raw:?}")))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params(pairs: &[(&str, &str)]) -> Params {
    Params(pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect())
  }

  #[test]
  fn repeated_keys_are_kept() {
    let p = params(&[("tags", "G45-AT"), ("other", "x"), ("tags", "G45-C"), ("tags", " ")]);
    assert_eq!(p.all("tags"), vec!["G45-AT", "G45-C"]);
    assert_eq!(p.get("tags"), Some("G45-AT"));
  }

  #[test]
  fn height_defaults_to_latest() {
    assert_eq!(params(&[]).height().unwrap(), u64::MAX);
    assert_eq!(params(&[("height", "")]).height().unwrap(), u64::MAX);
    assert_eq!(params(&[("height", "50000")]).height().unwrap(), 50_000);
    assert!(params(&[("height", "-1")]).height().is_err());
  }

  #[test]
  fn rmax_nonzero_means_all() {
    assert!(!params(&[]).match_all().unwrap());
    assert!(!params(&[("rmax", "0")]).match_all().unwrap());
    assert!(params(&[("rmax", "3")]).match_all().unwrap());
    assert!(params(&[("rmax", "x")]).match_all().is_err());
  }

  #[test]
  fn scid_is_validated() {
    assert!(matches!(params(&[]).scid(), Err(ApiError::BadRequest(_))));
    assert!(matches!(params(&[("scid", "zz")]).scid(), Err(ApiError::BadRequest(_))));
    let hex = "b77b1f5eeff6ed39c8b979c2aeb1c800081fc2ae8f570ad254bedf47bfa977f0";
    assert_eq!(params(&[("scid", hex)]).scid().unwrap().to_hex(), hex);
  }

  #[test]
  fn type_hints_override_digit_sniffing() {
    assert_eq!(params(&[("key", "123")]).var_key().unwrap(), VarKey::Uint(123));
    assert_eq!(
      params(&[("key", "123"), ("keytype", "string")]).var_key().unwrap(),
      VarKey::from("123")
    );
    assert!(params(&[("key", "abc"), ("keytype", "uint")]).var_key().is_err());
    assert!(params(&[("key", "1"), ("keytype", "float")]).var_key().is_err());
    assert_eq!(
      params(&[("val", "7"), ("valtype", "s")]).var_value().unwrap(),
      VarValue::from("7")
    );
    assert_eq!(params(&[("val", "7")]).var_value().unwrap(), VarValue::Uint(7));
  }

  #[test]
  fn uint_is_required_and_numeric() {
    assert_eq!(params(&[("mb", "512")]).uint("mb").unwrap(), 512);
    assert!(params(&[]).uint("mb").is_err());
    assert!(params(&[("mb", "-1")]).uint("mb").is_err());
  }
}
