//! Scan progress as a set of completed height ranges.
//!
//! Persisted under the `completed` setting as a JSON array of inclusive
//! `[start, end]` pairs. Ranges are kept sorted and non-overlapping; adjacent
//! ranges are merged. A height that failed to index stays out of every range,
//! which leaves a visible gap for later backfill.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletedRanges(Vec<[u64; 2]>);

impl CompletedRanges {
  pub fn new() -> Self { Self::default() }

  /// Build from arbitrary pairs, normalising order, overlaps and adjacency.
  pub fn from_pairs(pairs: impl IntoIterator<Item = [u64; 2]>) -> Result<Self> {
    let mut pairs: Vec<[u64; 2]> = pairs.into_iter().collect();
    if let Some(bad) = pairs.iter().find(|[s, e]| s > e) {
      return Err(Error::Config(format!(
        "completed range [{}, {}] has start after end",
        bad[0], bad[1]
      )));
    }
    pairs.sort_unstable();

    let mut out: Vec<[u64; 2]> = Vec::with_capacity(pairs.len());
    for [start, end] in pairs {
      match out.last_mut() {
        Some(last) if start <= last[1].saturating_add(1) => {
          last[1] = last[1].max(end);
        }
        _ => out.push([start, end]),
      }
    }
    Ok(Self(out))
  }

  /// Decode the persisted JSON form. An empty string is an empty set.
  pub fn from_json(s: &str) -> Result<Self> {
    if s.trim().is_empty() {
      return Ok(Self::new());
    }
    let pairs: Vec<[u64; 2]> = serde_json::from_str(s)?;
    Self::from_pairs(pairs)
  }

  pub fn to_json(&self) -> String {
    // Serialising a Vec of integer pairs cannot fail.
    serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_owned())
  }

  pub fn as_slice(&self) -> &[[u64; 2]] { &self.0 }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// Record `height` as fully indexed.
  ///
  /// Extends the neighbouring range when contiguous, otherwise opens a new
  /// one. Returns `false` if the height was already covered.
  pub fn mark(&mut self, height: u64) -> bool {
    // Index of the first range starting after `height`.
    let idx = self.0.partition_point(|[start, _]| *start <= height);

    if idx > 0 && self.0[idx - 1][1] >= height {
      return false;
    }

    let joins_prev = idx > 0 && self.0[idx - 1][1] + 1 == height;
    let joins_next = idx < self.0.len() && self.0[idx][0] == height.saturating_add(1);

    match (joins_prev, joins_next) {
      (true, true) => {
        self.0[idx - 1][1] = self.0[idx][1];
        self.0.remove(idx);
      }
      (true, false) => self.0[idx - 1][1] = height,
      (false, true) => self.0[idx][0] = height,
      (false, false) => self.0.insert(idx, [height, height]),
    }
    true
  }

  /// Greatest completed height, or 0 when nothing is indexed yet.
  pub fn last_index(&self) -> u64 { self.0.last().map_or(0, |[_, end]| *end) }

  /// The height at which forward scanning resumes.
  pub fn next_height(&self) -> u64 {
    self.0.last().map_or(0, |[_, end]| end + 1)
  }

  /// Missing inclusive height ranges between completed ranges.
  pub fn gaps(&self) -> Vec<[u64; 2]> {
    let mut gaps = Vec::new();
    if let Some([first, _]) = self.0.first()
      && *first > 0
    {
      gaps.push([0, first - 1]);
    }
    gaps.extend(self.0.windows(2).map(|w| [w[0][1] + 1, w[1][0] - 1]));
    gaps
  }

  /// Number of heights covered by all ranges.
  pub fn indexed_count(&self) -> u64 {
    self.0.iter().map(|[start, end]| end - start + 1).sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn assert_well_formed(r: &CompletedRanges) {
    for [s, e] in r.as_slice() {
      assert!(s <= e, "{r:?}");
    }
    for w in r.as_slice().windows(2) {
      assert!(w[0][1] + 1 < w[1][0], "overlapping or adjacent: {r:?}");
    }
  }

  #[test]
  fn sequential_marks_extend_one_range() {
    let mut r = CompletedRanges::new();
    for h in 0..=100 {
      assert!(r.mark(h));
    }
    assert_eq!(r.as_slice(), &[[0, 100]]);
    assert_eq!(r.last_index(), 100);
    assert_eq!(r.next_height(), 101);
  }

  #[test]
  fn skipped_height_opens_new_range() {
    let mut r = CompletedRanges::new();
    for h in 0..5 {
      r.mark(h);
    }
    for h in 6..9 {
      r.mark(h);
    }
    assert_eq!(r.as_slice(), &[[0, 4], [6, 8]]);
    assert_eq!(r.gaps(), vec![[5, 5]]);
    assert_eq!(r.indexed_count(), 8);
  }

  #[test]
  fn backfilling_a_gap_merges_ranges() {
    let mut r = CompletedRanges::from_pairs([[0, 4], [6, 8]]).unwrap();
    assert!(r.mark(5));
    assert_eq!(r.as_slice(), &[[0, 8]]);
    assert!(!r.mark(3));
  }

  #[test]
  fn out_of_order_marks_stay_well_formed() {
    let mut r = CompletedRanges::new();
    for h in [50, 10, 11, 49, 12, 30, 51, 0, 9] {
      r.mark(h);
      assert_well_formed(&r);
    }
    assert_eq!(r.as_slice(), &[[0, 0], [9, 12], [30, 30], [49, 51]]);
    assert_eq!(r.last_index(), 51);
    assert_eq!(r.indexed_count(), 9);
    assert_eq!(r.gaps(), vec![[1, 8], [13, 29], [31, 48]]);
  }

  #[test]
  fn from_pairs_normalises_overlaps() {
    let r = CompletedRanges::from_pairs([[10, 20], [0, 5], [4, 12], [22, 30]]).unwrap();
    assert_eq!(r.as_slice(), &[[0, 20], [22, 30]]);
    assert!(CompletedRanges::from_pairs([[5, 1]]).is_err());
  }

  #[test]
  fn json_form() {
    let r = CompletedRanges::from_json("[[0,10],[12,20]]").unwrap();
    assert_eq!(r.to_json(), "[[0,10],[12,20]]");
    assert!(CompletedRanges::from_json("").unwrap().is_empty());
    assert!(CompletedRanges::from_json("{oops").is_err());
  }

  #[test]
  fn empty_ranges_report_zero() {
    let r = CompletedRanges::new();
    assert_eq!(r.last_index(), 0);
    assert_eq!(r.next_height(), 0);
    assert!(r.gaps().is_empty());
  }
}
