//! Integration tests for `SqliteStore` against in-memory and temp-file
//! databases.

use scindex_core::{
  contract::{ContractRecord, Scid},
  ranges::CompletedRanges,
  settings::keys,
  store::{HeightBatch, IndexStore, TagMerge},
  variable::{ScVariable, SplitValues, VarKey, VarValue, VariableSnapshot},
};

use std::time::Duration;

use crate::{SqliteStore, StorageMode};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn scid(n: u8) -> Scid { Scid::from_bytes([n; 32]) }

fn record(n: u8, height: u64, class: &str, tags: &str) -> ContractRecord {
  ContractRecord {
    scid: scid(n),
    owner: format!("dero1owner{n}"),
    height,
    class: class.into(),
    tags: tags.into(),
    code: Some(format!("Function Initialize() Uint64\n10 RETURN 0 // {tags}\nEnd Function")),
    class_only: false,
  }
}

fn var(n: u8, key: impl Into<VarKey>, value: impl Into<VarValue>, topoheight: u64) -> VariableSnapshot {
  VariableSnapshot { scid: scid(n), key: key.into(), value: value.into(), topoheight }
}

/// Commit `batch`, marking its height in `ranges` first.
async fn commit(s: &SqliteStore, ranges: &mut CompletedRanges, batch: HeightBatch) {
  ranges.mark(batch.height);
  s.commit_height(batch, ranges.clone()).await.unwrap();
}

// ─── Point-in-time reads ─────────────────────────────────────────────────────

#[tokio::test]
async fn worked_example_count_over_time() {
  let s = store().await;
  let mut ranges = CompletedRanges::new();

  for h in 0..=100 {
    let mut batch = HeightBatch::new(h);
    match h {
      10 => batch.contracts.push(record(1, 10, "x-rule", "X")),
      20 => batch.variables.push(var(1, "count", 5u64, 20)),
      80 => batch.variables.push(var(1, "count", 9u64, 80)),
      _ => {}
    }
    commit(&s, &mut ranges, batch).await;
  }

  assert_eq!(s.get_last_index_height().await.unwrap(), 100);
  assert_eq!(s.completed_ranges().await.unwrap().as_slice(), &[[0, 100]]);
  assert_eq!(s.get_scids_by_class(vec!["x-rule".into()]).await.unwrap(), vec![scid(1)]);

  let at_50 = s
    .get_scid_values_by_key(scid(1), VarKey::from("count"), 50, false)
    .await
    .unwrap();
  assert_eq!(at_50.uints, vec![5]);
  let at_90 = s
    .get_scid_values_by_key(scid(1), VarKey::from("count"), 90, false)
    .await
    .unwrap();
  assert_eq!(at_90.uints, vec![9]);

  let history = s
    .get_scid_values_by_key(scid(1), VarKey::from("count"), 90, true)
    .await
    .unwrap();
  assert_eq!(history.uints, vec![5, 9]);

  let before = s
    .get_scid_values_by_key(scid(1), VarKey::from("count"), 19, false)
    .await
    .unwrap();
  assert!(before.is_empty());
}

#[tokio::test]
async fn variables_at_topoheight_take_latest_at_or_before() {
  let s = store().await;
  s.put_contract(record(1, 1, "x", "X")).await.unwrap();
  s.put_variable(var(1, "a", "one", 5)).await.unwrap();
  s.put_variable(var(1, "a", "two", 8)).await.unwrap();
  s.put_variable(var(1, "b", 7u64, 9)).await.unwrap();
  s.put_variable(var(1, 3u64, "three", 2)).await.unwrap();

  let at = |h| s.get_scid_variable_details_at_topoheight(scid(1), h);

  assert!(at(1).await.unwrap().is_empty());
  assert_eq!(at(5).await.unwrap(), vec![
    ScVariable { key: VarKey::Uint(3), value: "three".into() },
    ScVariable { key: "a".into(), value: "one".into() },
  ]);
  assert_eq!(at(8).await.unwrap()[1].value, VarValue::from("two"));
  assert_eq!(at(u64::MAX).await.unwrap().len(), 3);
}

#[tokio::test]
async fn same_key_same_height_last_write_wins() {
  let s = store().await;
  let mut batch = HeightBatch::new(4);
  batch.variables.push(var(1, "k", "first", 4));
  batch.variables.push(var(1, "k", "second", 4));
  commit(&s, &mut CompletedRanges::new(), batch).await;

  let all = s.get_all_scid_variable_details(scid(1)).await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].value, VarValue::from("second"));
}

#[tokio::test]
async fn keys_by_value_point_in_time_and_history() {
  let s = store().await;
  s.put_variable(var(1, "owner_a", "alice", 1)).await.unwrap();
  s.put_variable(var(1, "owner_b", "alice", 2)).await.unwrap();
  s.put_variable(var(1, "owner_a", "bob", 3)).await.unwrap();

  let now = s
    .get_scid_keys_by_value(scid(1), "alice".into(), 10, false)
    .await
    .unwrap();
  assert_eq!(now.strings, vec!["owner_b"]);

  let ever = s
    .get_scid_keys_by_value(scid(1), "alice".into(), 10, true)
    .await
    .unwrap();
  assert_eq!(ever.strings, vec!["owner_a", "owner_b"]);

  let early = s
    .get_scid_keys_by_value(scid(1), "alice".into(), 1, false)
    .await
    .unwrap();
  assert_eq!(early.strings, vec!["owner_a"]);
}

#[tokio::test]
async fn interaction_heights_are_distinct_and_ascending() {
  let s = store().await;
  for (key, h) in [("a", 9), ("b", 3), ("c", 9), ("a", 12)] {
    s.put_variable(var(2, key, 1u64, h)).await.unwrap();
  }
  assert_eq!(s.get_scid_interaction_height(scid(2)).await.unwrap(), vec![3, 9, 12]);

  let all = s.get_all_scid_variable_details(scid(2)).await.unwrap();
  let order: Vec<_> = all.iter().map(|v| (v.topoheight, v.key.to_string())).collect();
  assert_eq!(order, vec![
    (3, "b".to_owned()),
    (9, "a".to_owned()),
    (9, "c".to_owned()),
    (12, "a".to_owned()),
  ]);
}

#[tokio::test]
async fn unknown_scid_reads_are_empty() {
  let s = store().await;
  assert_eq!(s.get_contract(scid(9)).await.unwrap(), None);
  assert_eq!(s.get_initial_scid_code(scid(9)).await.unwrap(), "");
  assert!(s.get_sc(scid(9)).await.unwrap().variables.is_empty());
  assert!(s.get_all_scid_variable_details(scid(9)).await.unwrap().is_empty());
  assert!(s.get_scid_interaction_height(scid(9)).await.unwrap().is_empty());
  assert_eq!(
    s.get_scid_values_by_key(scid(9), "x".into(), 5, true).await.unwrap(),
    SplitValues::default()
  );
  assert_eq!(s.get_last_index_height().await.unwrap(), 0);
}

#[tokio::test]
async fn get_sc_reads_variables_at_last_index() {
  let s = store().await;
  let mut ranges = CompletedRanges::new();

  let mut batch = HeightBatch::new(0);
  batch.contracts.push(record(1, 0, "x", "X"));
  batch.variables.push(var(1, "v", 1u64, 0));
  commit(&s, &mut ranges, batch).await;

  // A write beyond the completed ranges is not visible through get_sc.
  s.put_variable(var(1, "v", 2u64, 50)).await.unwrap();

  let sc = s.get_sc(scid(1)).await.unwrap();
  assert!(sc.code.contains("Initialize"));
  assert_eq!(sc.variables, vec![ScVariable { key: "v".into(), value: VarValue::Uint(1) }]);
}

// ─── Contracts and tags ──────────────────────────────────────────────────────

#[tokio::test]
async fn class_only_record_has_no_code_and_frozen_tags() {
  let s = store().await;
  let mut rec = record(3, 4, "token", "SEND_ASSET_TO_ADDRESS");
  rec.code = None;
  rec.class_only = true;

  let mut batch = HeightBatch::new(4);
  batch.contracts.push(rec);
  commit(&s, &mut CompletedRanges::new(), batch).await;

  let mut merge = HeightBatch::new(5);
  merge.tag_merges.push(TagMerge { scid: scid(3), class: "other".into(), tags: "EXTRA".into() });
  commit(&s, &mut CompletedRanges::from_pairs([[4, 4]]).unwrap(), merge).await;

  assert_eq!(s.get_initial_scid_code(scid(3)).await.unwrap(), "");
  let stored = s.get_contract(scid(3)).await.unwrap().unwrap();
  assert_eq!(stored.tags, "SEND_ASSET_TO_ADDRESS");
  assert!(stored.class_only);
}

#[tokio::test]
async fn tag_merge_unions_tags_and_fills_empty_class() {
  let s = store().await;
  s.put_contract(record(4, 1, "", "")).await.unwrap();
  s.put_contract(record(5, 1, "g45", "G45-C")).await.unwrap();

  let mut batch = HeightBatch::new(2);
  batch.tag_merges.push(TagMerge { scid: scid(4), class: "swaps".into(), tags: "StartSwap".into() });
  batch.tag_merges.push(TagMerge { scid: scid(5), class: "nfa".into(), tags: "ART-NFA-MS1,G45-C".into() });
  commit(&s, &mut CompletedRanges::new(), batch).await;

  let four = s.get_contract(scid(4)).await.unwrap().unwrap();
  assert_eq!((four.class.as_str(), four.tags.as_str()), ("swaps", "StartSwap"));
  let five = s.get_contract(scid(5)).await.unwrap().unwrap();
  assert_eq!((five.class.as_str(), five.tags.as_str()), ("g45", "ART-NFA-MS1,G45-C"));
}

#[tokio::test]
async fn tag_search_is_substring_on_serialized_tags() {
  let s = store().await;
  s.put_contract(record(1, 1, "g45", "G45-FAT")).await.unwrap();
  s.put_contract(record(2, 2, "g45", "G45-AT")).await.unwrap();
  s.put_contract(record(3, 3, "tela", "docVersion")).await.unwrap();

  // `G45-AT` is not a substring of `G45-FAT`, but `AT` is.
  assert_eq!(s.get_scids_by_tags(vec!["G45-AT".into()]).await.unwrap(), vec![scid(2)]);
  assert_eq!(
    s.get_scids_by_tags(vec!["AT".into()]).await.unwrap(),
    vec![scid(1), scid(2)]
  );
  assert!(s.get_scids_by_tags(vec!["nonexistent".into()]).await.unwrap().is_empty());
  assert!(s.get_scids_by_tags(vec![String::new()]).await.unwrap().is_empty());

  let summaries = s
    .get_scs_by_tags(vec!["docVersion".into(), "G45-AT".into()])
    .await
    .unwrap();
  assert_eq!(summaries.len(), 2);
  assert_eq!(summaries[&scid(3)].class, "tela");
  assert_eq!(summaries[&scid(2)].owner, "dero1owner2");
}

#[tokio::test]
async fn owners_classes_and_distinct_values() {
  let s = store().await;
  s.put_contract(record(1, 1, "g45", "G45-AT,G45-C")).await.unwrap();
  s.put_contract(record(2, 2, "tela", "docVersion")).await.unwrap();
  s.put_contract(record(3, 3, "g45", "G45-C")).await.unwrap();

  let owners = s.get_all_owners_and_scids().await.unwrap();
  assert_eq!(owners.len(), 3);
  assert_eq!(owners[&scid(2)], "dero1owner2");

  assert_eq!(
    s.get_scids_by_class(vec!["g45".into(), "missing".into()]).await.unwrap(),
    vec![scid(1), scid(3)]
  );
  assert_eq!(s.distinct_classes().await.unwrap(), vec!["g45", "tela"]);
  assert_eq!(s.distinct_tags().await.unwrap(), vec!["G45-AT", "G45-C", "docVersion"]);
  assert!(s.size_bytes().await.unwrap() > 0);
}

// ─── Ranges, settings, truncation ────────────────────────────────────────────

#[tokio::test]
async fn ranges_commit_with_rows() {
  let s = store().await;
  let mut ranges = CompletedRanges::new();
  for h in [0, 1, 2, 5, 6] {
    commit(&s, &mut ranges, HeightBatch::new(h)).await;
  }
  let stored = s.completed_ranges().await.unwrap();
  assert_eq!(stored.as_slice(), &[[0, 2], [5, 6]]);
  assert_eq!(stored.gaps(), vec![[3, 4]]);
  assert_eq!(s.get_last_index_height().await.unwrap(), 6);
}

#[tokio::test]
async fn truncate_keeps_unrelated_settings() {
  let s = store().await;
  let mut batch = HeightBatch::new(0);
  batch.contracts.push(record(1, 0, "x", "X"));
  batch.variables.push(var(1, "k", 1u64, 0));
  commit(&s, &mut CompletedRanges::new(), batch).await;
  s.save_setting(keys::RECLASSIFY_TARGET, "0").await.unwrap();

  s.truncate_index().await.unwrap();

  assert!(s.get_all_owners_and_scids().await.unwrap().is_empty());
  assert!(s.get_all_scid_variable_details(scid(1)).await.unwrap().is_empty());
  assert!(s.completed_ranges().await.unwrap().is_empty());
  assert_eq!(s.load_setting(keys::RECLASSIFY_TARGET).await.unwrap().as_deref(), Some("0"));

  s.delete_setting(keys::RECLASSIFY_TARGET).await.unwrap();
  assert_eq!(s.load_setting(keys::RECLASSIFY_TARGET).await.unwrap(), None);
}

#[tokio::test]
async fn digest_tracks_content() {
  let a = store().await;
  let b = store().await;
  assert_eq!(a.table_digest().await.unwrap(), b.table_digest().await.unwrap());

  a.put_contract(record(1, 1, "x", "X")).await.unwrap();
  assert_ne!(a.table_digest().await.unwrap(), b.table_digest().await.unwrap());

  b.put_contract(record(1, 1, "x", "X")).await.unwrap();
  assert_eq!(a.table_digest().await.unwrap(), b.table_digest().await.unwrap());

  b.put_variable(var(1, "k", 1u64, 2)).await.unwrap();
  assert_ne!(a.table_digest().await.unwrap(), b.table_digest().await.unwrap());
}

// ─── Ready gate ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn distinct_reads_wait_for_ready_gate() {
  let s = store().await;
  s.put_contract(record(1, 1, "x", "X")).await.unwrap();
  s.set_ready(false);
  assert!(!s.is_ready());

  let reader = {
    let s = s.clone();
    tokio::spawn(async move { s.distinct_classes().await.unwrap() })
  };
  tokio::time::sleep(std::time::Duration::from_millis(50)).await;
  assert!(!reader.is_finished());

  s.set_ready(true);
  assert_eq!(reader.await.unwrap(), vec!["x"]);
}

// ─── Storage modes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn memory_mode_restores_and_flushes_backing_file() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("scindexdb").join("index.db");

  let disk = SqliteStore::open(&path).await.unwrap();
  disk.put_contract(record(1, 1, "x", "X")).await.unwrap();
  disk.close().await.unwrap();

  let mem = SqliteStore::open_with_mode(&path, StorageMode::Memory { budget_mb: 64 })
    .await
    .unwrap();
  assert!(mem.mode().is_memory());
  assert!(mem.get_contract(scid(1)).await.unwrap().is_some());
  mem.put_contract(record(2, 2, "x", "X")).await.unwrap();
  mem.close().await.unwrap();

  let reopened = SqliteStore::open(&path).await.unwrap();
  assert_eq!(reopened.get_all_owners_and_scids().await.unwrap().len(), 2);
}

#[tokio::test]
async fn memory_budget_overflow_switches_to_disk_without_loss() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("index.db");
  let s = SqliteStore::open_with_mode(&path, StorageMode::Memory { budget_mb: 1 })
    .await
    .unwrap();

  let big = "x".repeat(64 * 1024);
  let mut stored = 0u8;
  let mut overflowed = None;
  for n in 0..100u8 {
    let mut rec = record(n, u64::from(n), "x", "X");
    rec.code = Some(big.clone());
    match s.put_contract(rec.clone()).await {
      Ok(()) => stored += 1,
      Err(e) => {
        assert!(e.is_storage_full(), "unexpected error: {e}");
        overflowed = Some(rec);
        break;
      }
    }
  }
  let rec = overflowed.expect("budget should have been exceeded");

  let other = s.clone();
  s.switch_to_disk().await.unwrap();
  assert_eq!(other.mode(), StorageMode::Disk);

  other.put_contract(rec).await.unwrap();
  assert_eq!(other.get_all_owners_and_scids().await.unwrap().len(), usize::from(stored) + 1);
}

#[tokio::test]
async fn memory_restore_leaves_backing_file_in_wal_mode() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("index.db");

  let disk = SqliteStore::open(&path).await.unwrap();
  let mut batch = HeightBatch::new(3);
  batch.contracts.push(record(1, 3, "x", "X"));
  batch.variables.push(var(1, "k", "v", 3));
  commit(&disk, &mut CompletedRanges::new(), batch).await;
  disk.close().await.unwrap();

  let journal_mode = |path: &std::path::Path| -> String {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap()
  };
  assert_eq!(journal_mode(&path), "wal");

  let mem = SqliteStore::open_with_mode(&path, StorageMode::Memory { budget_mb: 16 })
    .await
    .unwrap();
  assert_eq!(journal_mode(&path), "wal");
  assert_eq!(mem.get_last_index_height().await.unwrap(), 3);
  assert_eq!(mem.get_all_scid_variable_details(scid(1)).await.unwrap().len(), 1);
  mem.close().await.unwrap();

  assert_eq!(journal_mode(&path), "wal");
  let reopened = SqliteStore::open(&path).await.unwrap();
  assert!(reopened.get_contract(scid(1)).await.unwrap().is_some());
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

/// A read transaction held open on the query side must not delay the next
/// height commit.
async fn assert_commit_not_blocked_by_read(s: SqliteStore) {
  let mut ranges = CompletedRanges::new();
  let mut first = HeightBatch::new(0);
  first.contracts.push(record(1, 0, "x", "X"));
  commit(&s, &mut ranges, first).await;

  let held = {
    let s = s.clone();
    tokio::spawn(async move { s.hold_read(Duration::from_millis(1_500)).await })
  };
  tokio::time::sleep(Duration::from_millis(100)).await;

  let mut next = HeightBatch::new(1);
  next.variables.push(var(1, "k", 1u64, 1));
  ranges.mark(1);
  tokio::time::timeout(Duration::from_millis(750), s.commit_height(next, ranges.clone()))
    .await
    .expect("commit waited behind the open read")
    .unwrap();
  assert!(!held.is_finished());

  held.await.unwrap().unwrap();
  assert_eq!(s.get_last_index_height().await.unwrap(), 1);
}

#[tokio::test]
async fn open_read_does_not_stall_disk_commits() {
  let dir = tempfile::tempdir().unwrap();
  let s = SqliteStore::open(dir.path().join("index.db")).await.unwrap();
  assert_commit_not_blocked_by_read(s).await;
}

#[tokio::test]
async fn open_read_does_not_stall_memory_commits() {
  assert_commit_not_blocked_by_read(store().await).await;
}

#[tokio::test]
async fn readers_see_data_after_switching_to_disk() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("index.db");
  let s = SqliteStore::open_with_mode(&path, StorageMode::Memory { budget_mb: 8 })
    .await
    .unwrap();
  s.put_contract(record(1, 1, "x", "X")).await.unwrap();

  s.switch_to_disk().await.unwrap();
  s.put_contract(record(2, 2, "x", "X")).await.unwrap();
  assert_eq!(s.get_all_owners_and_scids().await.unwrap().len(), 2);
}

/// Readers running alongside ingestion see whole heights only.
async fn assert_batches_seen_whole(s: SqliteStore) {
  const KEYS: usize = 12;
  const HEIGHTS: u64 = 40;

  let writer = {
    let s = s.clone();
    tokio::spawn(async move {
      let mut ranges = CompletedRanges::new();
      for height in 0..HEIGHTS {
        let mut batch = HeightBatch::new(height);
        for k in 0..KEYS {
          batch.variables.push(var(1, format!("k{k}"), height, height));
        }
        commit(&s, &mut ranges, batch).await;
      }
    })
  };

  while !writer.is_finished() {
    let seen = s.get_all_scid_variable_details(scid(1)).await.unwrap();
    assert_eq!(seen.len() % KEYS, 0, "read a height halfway through its commit");
  }
  writer.await.unwrap();
  assert_eq!(s.get_all_scid_variable_details(scid(1)).await.unwrap().len(), KEYS * HEIGHTS as usize);
}

#[tokio::test]
async fn disk_reads_never_see_half_a_height() {
  let dir = tempfile::tempdir().unwrap();
  assert_batches_seen_whole(SqliteStore::open(dir.path().join("index.db")).await.unwrap()).await;
}

#[tokio::test]
async fn memory_reads_never_see_half_a_height() {
  assert_batches_seen_whole(store().await).await;
}
