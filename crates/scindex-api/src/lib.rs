//! HTTP control and query surface for scindex.
//!
//! Exposes an axum [`Router`] backed by any
//! [`scindex_core::store::IndexStore`] and an [`IndexerHandle`]. Every
//! endpoint is a `GET` taking query parameters and returning JSON. Transport
//! concerns (binding, TLS, tracing layers) are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = scindex_api::api_router(Arc::new(store), handle);
//! ```

pub mod control;
pub mod error;
pub mod params;
pub mod query;

use std::sync::Arc;

use axum::{Router, routing::get};
use scindex_core::store::IndexStore;
use scindex_ingest::IndexerHandle;

pub use error::ApiError;

/// Shared state for every handler.
pub struct ApiState<S> {
  pub store:   Arc<S>,
  pub indexer: IndexerHandle,
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), indexer: self.indexer.clone() }
  }
}

/// Build the API router for `store` and the pipeline behind `indexer`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>, indexer: IndexerHandle) -> Router<()>
where
  S: IndexStore + 'static,
{
  Router::new()
    // Control
    .route("/Info", get(control::info::<S>))
    .route("/Start", get(control::start::<S>))
    .route("/Pause", get(control::pause::<S>))
    .route("/Resume", get(control::resume::<S>))
    .route("/Reclassify", get(control::reclassify::<S>))
    .route("/SetRamSize", get(control::set_ram_size::<S>))
    // Queries
    .route("/GetLastIndexHeight", get(query::last_index_height::<S>))
    .route("/GetAllOwnersAndSCIDs", get(query::all_owners::<S>))
    .route("/GetSC", get(query::sc::<S>))
    .route("/GetInitialSCIDCode", get(query::initial_code::<S>))
    .route("/GetAllSCIDVariableDetails", get(query::all_variables::<S>))
    .route("/GetSCIDVariableDetailsAtTopoheight", get(query::variables_at::<S>))
    .route("/GetSCIDInteractionHeight", get(query::interaction_heights::<S>))
    .route("/GetSCIDValuesByKey", get(query::values_by_key::<S>))
    .route("/GetSCIDKeysByValue", get(query::keys_by_value::<S>))
    .route("/GetSCIDsByClass", get(query::scids_by_class::<S>))
    .route("/GetSCIDsByTags", get(query::scids_by_tags::<S>))
    .route("/GetSCsByTags", get(query::scs_by_tags::<S>))
    .route("/GetClasses", get(query::classes::<S>))
    .route("/GetTags", get(query::tags::<S>))
    .route("/GetTelaIndexes", get(query::tela_indexes::<S>))
    .with_state(ApiState { store, indexer })
}
