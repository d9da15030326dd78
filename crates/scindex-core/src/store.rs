//! The `IndexStore` trait and supporting write/read types.
//!
//! The trait is implemented by storage backends (e.g. `scindex-store-sqlite`).
//! Higher layers (`scindex-ingest`, `scindex-api`) depend on this abstraction,
//! not on any concrete backend.

use std::{collections::BTreeMap, future::Future};

use serde::{Deserialize, Serialize};

use crate::{
  contract::{ContractRecord, ContractSummary, Scid},
  ranges::CompletedRanges,
  variable::{ScVariable, SplitValues, VarKey, VarValue, VariableSnapshot},
};

// ─── Write types ─────────────────────────────────────────────────────────────

/// Tags gained by an existing contract through a matching invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMerge {
  pub scid:  Scid,
  /// Applied only when the record has no class yet.
  pub class: String,
  /// Canonical tag string to union with the stored tags.
  pub tags:  String,
}

/// Everything one height contributes to the index. Committed atomically
/// together with the updated completed ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeightBatch {
  pub height:     u64,
  pub contracts:  Vec<ContractRecord>,
  pub tag_merges: Vec<TagMerge>,
  pub variables:  Vec<VariableSnapshot>,
}

impl HeightBatch {
  pub fn new(height: u64) -> Self { Self { height, ..Self::default() } }

  pub fn is_empty(&self) -> bool {
    self.contracts.is_empty() && self.tag_merges.is_empty() && self.variables.is_empty()
  }
}

// ─── Read types ──────────────────────────────────────────────────────────────

/// A contract's source and its variables at the last indexed height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScDetails {
  pub code:      String,
  pub variables: Vec<ScVariable>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a contract-state index backend.
///
/// Contract and variable rows are append-only; the only deletion is
/// [`IndexStore::truncate_index`], used by reclassification. Queries for
/// unknown contracts or keys return empty results rather than errors.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait IndexStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Insert (or replace) a single contract record.
  fn put_contract(
    &self,
    record: ContractRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Append a single variable snapshot.
  fn put_variable(
    &self,
    snapshot: VariableSnapshot,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Apply one height's rows and persist `ranges` in a single transaction.
  fn commit_height(
    &self,
    batch: HeightBatch,
    ranges: CompletedRanges,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Delete all contracts, variables and completed ranges.
  fn truncate_index(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Settings ──────────────────────────────────────────────────────────

  fn load_setting<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;

  fn save_setting<'a>(
    &'a self,
    key: &'a str,
    value: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn delete_setting<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// The persisted completed ranges (empty when never scanned).
  fn completed_ranges(
    &self,
  ) -> impl Future<Output = Result<CompletedRanges, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Greatest completed height, or 0.
  fn get_last_index_height(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn get_contract(
    &self,
    scid: Scid,
  ) -> impl Future<Output = Result<Option<ContractRecord>, Self::Error>> + Send + '_;

  fn get_all_owners_and_scids(
    &self,
  ) -> impl Future<Output = Result<BTreeMap<Scid, String>, Self::Error>> + Send + '_;

  /// Source plus variables at the last indexed height.
  fn get_sc(
    &self,
    scid: Scid,
  ) -> impl Future<Output = Result<ScDetails, Self::Error>> + Send + '_;

  /// Install source; empty when unknown or discarded by a class-only rule.
  fn get_initial_scid_code(
    &self,
    scid: Scid,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + '_;

  /// Every snapshot ever recorded for `scid`, by topoheight then key.
  fn get_all_scid_variable_details(
    &self,
    scid: Scid,
  ) -> impl Future<Output = Result<Vec<VariableSnapshot>, Self::Error>> + Send + '_;

  /// For every key, the snapshot with the greatest topoheight `<= height`.
  fn get_scid_variable_details_at_topoheight(
    &self,
    scid: Scid,
    height: u64,
  ) -> impl Future<Output = Result<Vec<ScVariable>, Self::Error>> + Send + '_;

  /// Distinct topoheights at which `scid` had variable writes, ascending.
  fn get_scid_interaction_height(
    &self,
    scid: Scid,
  ) -> impl Future<Output = Result<Vec<u64>, Self::Error>> + Send + '_;

  /// Values of `key` at or before `height`: the latest one, or the whole
  /// history when `match_all`.
  fn get_scid_values_by_key(
    &self,
    scid: Scid,
    key: VarKey,
    height: u64,
    match_all: bool,
  ) -> impl Future<Output = Result<SplitValues, Self::Error>> + Send + '_;

  /// Keys holding `value` at `height`, or every key that was ever written
  /// `value` at or before `height` when `match_all`.
  fn get_scid_keys_by_value(
    &self,
    scid: Scid,
    value: VarValue,
    height: u64,
    match_all: bool,
  ) -> impl Future<Output = Result<SplitValues, Self::Error>> + Send + '_;

  fn get_scids_by_class(
    &self,
    classes: Vec<String>,
  ) -> impl Future<Output = Result<Vec<Scid>, Self::Error>> + Send + '_;

  /// Substring match against the stored comma-joined tag string. A short tag
  /// can therefore match a longer one (`AT` matches `FAT`).
  fn get_scids_by_tags(
    &self,
    tags: Vec<String>,
  ) -> impl Future<Output = Result<Vec<Scid>, Self::Error>> + Send + '_;

  fn get_scs_by_tags(
    &self,
    tags: Vec<String>,
  ) -> impl Future<Output = Result<BTreeMap<Scid, ContractSummary>, Self::Error>> + Send + '_;

  /// Classes currently present in the index.
  fn distinct_classes(&self) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// Individual tags currently present in the index.
  fn distinct_tags(&self) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + '_;

  /// Current size of the index database in bytes.
  fn size_bytes(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}
