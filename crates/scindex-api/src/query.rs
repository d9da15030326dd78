//! Handlers for the read-only query endpoints.
//!
//! Unknown SCIDs and keys produce empty results, never errors. `height`
//! defaults to the latest height; a non-zero `rmax` returns every match.

use std::collections::BTreeMap;

use axum::{Json, extract::State};
use scindex_core::{
  contract::{ContractSummary, Scid},
  store::IndexStore,
  variable::{ScVariable, VariableSnapshot},
};
use serde::Serialize;

use crate::{ApiState, error::ApiError, params::Params};

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
pub struct ScResponse {
  pub sc_code:   String,
  pub variables: Vec<ScVariable>,
}

#[derive(Debug, Serialize)]
pub struct ValuesResponse {
  pub valuesstring: Vec<String>,
  pub valuesuint64: Vec<u64>,
}

#[derive(Debug, Serialize)]
pub struct KeysResponse {
  pub keysstring: Vec<String>,
  pub keysuint64: Vec<u64>,
}

/// Tag carried by TELA index contracts.
pub const TELA_INDEX_TAG: &str = "telaVersion";

/// A TELA index contract with its header variables.
#[derive(Debug, Serialize)]
pub struct TelaIndex {
  pub scid:        Scid,
  pub name:        Option<String>,
  pub icon_url:    Option<String>,
  pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TelaIndexesResponse {
  /// Height the headers were read at.
  pub height:  u64,
  pub indexes: Vec<TelaIndex>,
}

/// `GET /GetLastIndexHeight`
pub async fn last_index_height<S: IndexStore>(State(state): State<ApiState<S>>) -> ApiResult<u64> {
  Ok(Json(state.store.get_last_index_height().await.map_err(ApiError::store)?))
}

/// `GET /GetAllOwnersAndSCIDs`
pub async fn all_owners<S: IndexStore>(
  State(state): State<ApiState<S>>,
) -> ApiResult<BTreeMap<Scid, String>> {
  Ok(Json(state.store.get_all_owners_and_scids().await.map_err(ApiError::store)?))
}

/// `GET /GetSC?scid=`
pub async fn sc<S: IndexStore>(State(state): State<ApiState<S>>, params: Params) -> ApiResult<ScResponse> {
  let details = state.store.get_sc(params.scid()?).await.map_err(ApiError::store)?;
  Ok(Json(ScResponse { sc_code: details.code, variables: details.variables }))
}

/// `GET /GetInitialSCIDCode?scid=`
pub async fn initial_code<S: IndexStore>(State(state): State<ApiState<S>>, params: Params) -> ApiResult<String> {
  Ok(Json(
    state
      .store
      .get_initial_scid_code(params.scid()?)
      .await
      .map_err(ApiError::store)?,
  ))
}

/// `GET /GetAllSCIDVariableDetails?scid=`
pub async fn all_variables<S: IndexStore>(
  State(state): State<ApiState<S>>,
  params: Params,
) -> ApiResult<Vec<VariableSnapshot>> {
  Ok(Json(
    state
      .store
      .get_all_scid_variable_details(params.scid()?)
      .await
      .map_err(ApiError::store)?,
  ))
}

/// `GET /GetSCIDVariableDetailsAtTopoheight?scid=&height=`
pub async fn variables_at<S: IndexStore>(
  State(state): State<ApiState<S>>,
  params: Params,
) -> ApiResult<Vec<ScVariable>> {
  let (scid, height) = (params.scid()?, params.height()?);
  Ok(Json(
    state
      .store
      .get_scid_variable_details_at_topoheight(scid, height)
      .await
      .map_err(ApiError::store)?,
  ))
}

/// `GET /GetSCIDInteractionHeight?scid=`
pub async fn interaction_heights<S: IndexStore>(
  State(state): State<ApiState<S>>,
  params: Params,
) -> ApiResult<Vec<u64>> {
  Ok(Json(
    state
      .store
      .get_scid_interaction_height(params.scid()?)
      .await
      .map_err(ApiError::store)?,
  ))
}

/// `GET /GetSCIDValuesByKey?scid=&key=[&keytype=][&height=][&rmax=]`
pub async fn values_by_key<S: IndexStore>(
  State(state): State<ApiState<S>>,
  params: Params,
) -> ApiResult<ValuesResponse> {
  let scid = params.scid()?;
  let key = params.var_key()?;
  let (height, match_all) = (params.height()?, params.match_all()?);

  let found = state
    .store
    .get_scid_values_by_key(scid, key, height, match_all)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(ValuesResponse { valuesstring: found.strings, valuesuint64: found.uints }))
}

/// `GET /GetSCIDKeysByValue?scid=&val=[&valtype=][&height=][&rmax=]`
pub async fn keys_by_value<S: IndexStore>(
  State(state): State<ApiState<S>>,
  params: Params,
) -> ApiResult<KeysResponse> {
  let scid = params.scid()?;
  let value = params.var_value()?;
  let (height, match_all) = (params.height()?, params.match_all()?);

  let found = state
    .store
    .get_scid_keys_by_value(scid, value, height, match_all)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(KeysResponse { keysstring: found.strings, keysuint64: found.uints }))
}

/// `GET /GetSCIDsByClass?class=..[&class=..]`
pub async fn scids_by_class<S: IndexStore>(State(state): State<ApiState<S>>, params: Params) -> ApiResult<Vec<Scid>> {
  Ok(Json(
    state
      .store
      .get_scids_by_class(params.all("class"))
      .await
      .map_err(ApiError::store)?,
  ))
}

/// `GET /GetSCIDsByTags?tags=..[&tags=..]`
pub async fn scids_by_tags<S: IndexStore>(State(state): State<ApiState<S>>, params: Params) -> ApiResult<Vec<Scid>> {
  Ok(Json(
    state
      .store
      .get_scids_by_tags(params.all("tags"))
      .await
      .map_err(ApiError::store)?,
  ))
}

/// `GET /GetSCsByTags?tags=..[&tags=..]`
pub async fn scs_by_tags<S: IndexStore>(
  State(state): State<ApiState<S>>,
  params: Params,
) -> ApiResult<BTreeMap<Scid, ContractSummary>> {
  Ok(Json(
    state
      .store
      .get_scs_by_tags(params.all("tags"))
      .await
      .map_err(ApiError::store)?,
  ))
}

/// `GET /GetClasses`
pub async fn classes<S: IndexStore>(State(state): State<ApiState<S>>) -> ApiResult<Vec<String>> {
  Ok(Json(state.store.distinct_classes().await.map_err(ApiError::store)?))
}

/// `GET /GetTags`
pub async fn tags<S: IndexStore>(State(state): State<ApiState<S>>) -> ApiResult<Vec<String>> {
  Ok(Json(state.store.distinct_tags().await.map_err(ApiError::store)?))
}

/// `GET /GetTelaIndexes`
pub async fn tela_indexes<S: IndexStore>(State(state): State<ApiState<S>>) -> ApiResult<TelaIndexesResponse> {
  let store = &state.store;
  let height = store.get_last_index_height().await.map_err(ApiError::store)?;
  let scids = store
    .get_scids_by_tags(vec![TELA_INDEX_TAG.to_owned()])
    .await
    .map_err(ApiError::store)?;

  let mut indexes = Vec::with_capacity(scids.len());
  for scid in scids {
    let vars = store
      .get_scid_variable_details_at_topoheight(scid, height)
      .await
      .map_err(ApiError::store)?;
    let header = |name: &str| {
      vars
        .iter()
        .find(|v| v.key.as_str() == Some(name))
        .map(|v| v.value.to_string())
    };
    indexes.push(TelaIndex {
      scid,
      name: header("nameHdr"),
      icon_url: header("iconURLHdr"),
      description: header("descrHdr"),
    });
  }
  Ok(Json(TelaIndexesResponse { height, indexes }))
}
