//! Errors from the JSON-RPC chain client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("no node endpoints configured")]
  NoEndpoints,

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// The node answered with a JSON-RPC error object.
  #[error("rpc error {code}: {message}")]
  Rpc { code: i64, message: String },

  #[error("malformed rpc response: {0}")]
  Malformed(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
