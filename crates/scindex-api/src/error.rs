//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every failure is reported with the same body shape,
//! `{"status": false, "error_msg": "..."}`.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  /// Missing or malformed query parameter.
  #[error("bad request: {0}")]
  BadRequest(String),

  /// The pipeline refused a control command in its current state.
  #[error("{0}")]
  Control(String),

  /// The pipeline controller has exited.
  #[error("indexer unavailable: {0}")]
  Unavailable(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    ApiError::Store(Box::new(e))
  }
}

impl From<scindex_ingest::Error> for ApiError {
  fn from(e: scindex_ingest::Error) -> Self {
    match e {
      scindex_ingest::Error::Busy(msg) => ApiError::Control(msg.to_owned()),
      scindex_ingest::Error::Stopped => ApiError::Unavailable("controller has stopped".into()),
      other => ApiError::store(other),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Control(_) => StatusCode::OK,
      ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::Store(e) => {
        tracing::error!(error = %e, "request failed on storage error");
        StatusCode::INTERNAL_SERVER_ERROR
      }
    };
    let message = match &self {
      ApiError::Control(m) => m.clone(),
      other => other.to_string(),
    };
    (status, Json(json!({ "status": false, "error_msg": message }))).into_response()
  }
}
