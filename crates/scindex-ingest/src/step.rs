//! The per-height step: turn one block into a [`HeightBatch`].

use std::collections::HashMap;

use scindex_core::{
  chain::{Block, ChainTx, TxAction, VariableWrite},
  contract::{ContractRecord, Scid},
  filter::{Classification, FilterSet},
  store::{HeightBatch, IndexStore, TagMerge},
  variable::VariableSnapshot,
};

/// Classify every transaction of `block` and collect the rows it adds.
///
/// Transactions that fail to decode are skipped with a warning. Contracts
/// already in `store` are looked up once per block; contracts created by an
/// earlier transaction of the same block count as indexed.
pub async fn build_batch<S: IndexStore>(
  store: &S,
  filters: &FilterSet,
  block: &Block,
) -> Result<HeightBatch, S::Error> {
  let height = block.height;
  let mut batch = HeightBatch::new(height);
  // scid -> class_only, for contracts known to be indexed.
  let mut indexed: HashMap<Scid, bool> = HashMap::new();

  for raw in &block.transactions {
    let tx = match ChainTx::decode(raw) {
      Ok(tx) => tx,
      Err(e) => {
        tracing::warn!(height, txid = %raw.txid, error = %e, "skipping undecodable transaction");
        continue;
      }
    };

    match &tx.action {
      TxAction::Install { scid, code } => {
        let Some(class) = filters.classify_install(code) else { continue };
        tracing::debug!(height, %scid, class = %class.class, "indexing installed contract");
        indexed.insert(*scid, class.class_only);
        batch
          .contracts
          .push(new_record(*scid, &tx.signer, height, class, Some(code.clone())));
        push_writes(&mut batch, *scid, &tx.writes, height);
      }

      TxAction::Invoke { scid, args } => {
        let class = filters
          .classify_invoke(args.iter().map(|a| (a.name.as_str(), a.value.to_string())));

        let known = match indexed.get(scid) {
          Some(class_only) => Some(*class_only),
          None => {
            let found = store.get_contract(*scid).await?.map(|r| r.class_only);
            if let Some(class_only) = found {
              indexed.insert(*scid, class_only);
            }
            found
          }
        };

        match (known, class) {
          (Some(class_only), class) => {
            if let (false, Some(class)) = (class_only, class) {
              batch.tag_merges.push(TagMerge { scid: *scid, class: class.class, tags: class.tags });
            }
            push_writes(&mut batch, *scid, &tx.writes, height);
          }
          (None, Some(class)) => {
            tracing::debug!(height, %scid, class = %class.class, "indexing contract on invocation");
            indexed.insert(*scid, class.class_only);
            batch.contracts.push(new_record(*scid, &tx.signer, height, class, None));
            push_writes(&mut batch, *scid, &tx.writes, height);
          }
          (None, None) => {}
        }
      }

      TxAction::Other => {}
    }
  }

  Ok(batch)
}

fn new_record(
  scid: Scid,
  owner: &str,
  height: u64,
  class: Classification,
  code: Option<String>,
) -> ContractRecord {
  ContractRecord {
    scid,
    owner: owner.to_owned(),
    height,
    code: if class.class_only { None } else { code },
    class: class.class,
    tags: class.tags,
    class_only: class.class_only,
  }
}

fn push_writes(batch: &mut HeightBatch, scid: Scid, writes: &[VariableWrite], topoheight: u64) {
  batch.variables.extend(writes.iter().map(|w| VariableSnapshot {
    scid,
    key: w.key.clone(),
    value: w.value.clone(),
    topoheight,
  }));
}

#[cfg(test)]
mod tests {
  use scindex_core::{
    chain::RawTransaction,
    filter::{FilterConfig, FilterRule, OPTION_CASE_INSENSITIVE, OPTION_CLASS_ONLY},
    variable::VarKey,
  };
  use scindex_store_sqlite::SqliteStore;
  use serde_json::json;

  use super::*;

  fn scid_hex(n: u8) -> String { Scid::from_bytes([n; 32]).to_hex() }

  fn filters() -> FilterSet {
    let mut config = FilterConfig::new();
    config.insert("swaps".into(), FilterRule::new(["StartSwap"]));
    config.insert(
      "token".into(),
      FilterRule::new(["SEND_ASSET_TO_ADDRESS"])
        .with_option(OPTION_CASE_INSENSITIVE)
        .with_option(OPTION_CLASS_ONLY),
    );
    FilterSet::compile(&config).unwrap()
  }

  fn tx(txid: &str, body: serde_json::Value) -> RawTransaction {
    RawTransaction { txid: txid.into(), body }
  }

  #[tokio::test]
  async fn install_match_creates_record_with_writes() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let block = Block {
      height:       12,
      transactions: vec![
        tx("a", json!({
          "signer": "dero1alice",
          "install": { "scid": scid_hex(1), "code": "Function StartSwap() Uint64" },
          "writes": [ { "key": "owner", "value": "dero1alice" } ]
        })),
        tx("b", json!({
          "signer": "dero1bob",
          "install": { "scid": scid_hex(2), "code": "Function Nothing() Uint64" },
          "writes": [ { "key": "x", "value": 1 } ]
        })),
      ],
    };

    let batch = build_batch(&store, &filters(), &block).await.unwrap();
    assert_eq!(batch.contracts.len(), 1);
    let rec = &batch.contracts[0];
    assert_eq!((rec.class.as_str(), rec.owner.as_str(), rec.height), ("swaps", "dero1alice", 12));
    assert!(rec.code.is_some());
    assert_eq!(batch.variables.len(), 1);
    assert_eq!(batch.variables[0].key, VarKey::from("owner"));
    assert_eq!(batch.variables[0].topoheight, 12);
  }

  #[tokio::test]
  async fn class_only_install_drops_code() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let block = Block {
      height:       3,
      transactions: vec![tx("a", json!({
        "signer": "dero1alice",
        "install": { "scid": scid_hex(1), "code": "send_asset_to_address(ADDR, 1, SCID())" }
      }))],
    };
    let batch = build_batch(&store, &filters(), &block).await.unwrap();
    assert_eq!(batch.contracts[0].class, "token");
    assert!(batch.contracts[0].class_only);
    assert_eq!(batch.contracts[0].code, None);
  }

  #[tokio::test]
  async fn invokes_of_indexed_contracts_record_writes_and_merge_tags() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let block = Block {
      height:       5,
      transactions: vec![
        tx("install", json!({
          "signer": "dero1alice",
          "install": { "scid": scid_hex(1), "code": "Function Initialize() Uint64" }
        })),
        tx("install-swaps", json!({
          "signer": "dero1alice",
          "install": { "scid": scid_hex(2), "code": "Function StartSwap() Uint64" }
        })),
        tx("invoke", json!({
          "signer": "dero1bob",
          "invoke": { "scid": scid_hex(2), "args": [ { "name": "entrypoint", "value": "StartSwap" } ] },
          "writes": [ { "key": "swaps", "value": 1 } ]
        })),
        tx("invoke-unknown", json!({
          "signer": "dero1carol",
          "invoke": { "scid": scid_hex(3), "args": [ { "name": "entrypoint", "value": "Noop" } ] },
          "writes": [ { "key": "ignored", "value": 1 } ]
        })),
        tx("broken", json!({ "install": { "scid": "nothex" } })),
      ],
    };

    let batch = build_batch(&store, &filters(), &block).await.unwrap();
    assert_eq!(batch.contracts.len(), 1);
    assert_eq!(batch.tag_merges.len(), 1);
    assert_eq!(batch.tag_merges[0].tags, "StartSwap");
    assert_eq!(batch.variables.len(), 1);
    assert_eq!(batch.variables[0].scid, Scid::from_bytes([2; 32]));
  }

  #[tokio::test]
  async fn invoke_match_on_unindexed_contract_creates_record() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let block = Block {
      height:       9,
      transactions: vec![tx("invoke", json!({
        "signer": "dero1bob",
        "invoke": { "scid": scid_hex(4), "args": [ { "name": "entrypoint", "value": "StartSwap" } ] },
        "writes": [ { "key": 1, "value": "open" } ]
      }))],
    };

    let batch = build_batch(&store, &filters(), &block).await.unwrap();
    let rec = &batch.contracts[0];
    assert_eq!((rec.owner.as_str(), rec.class.as_str()), ("dero1bob", "swaps"));
    assert_eq!(rec.code, None);
    assert_eq!(batch.variables[0].key, VarKey::Uint(1));
  }

  #[tokio::test]
  async fn class_only_records_do_not_gain_tags() {
    let store = SqliteStore::open_in_memory().await.unwrap();
    store
      .put_contract(ContractRecord {
        scid:       Scid::from_bytes([7; 32]),
        owner:      "dero1alice".into(),
        height:     1,
        class:      "token".into(),
        tags:       "SEND_ASSET_TO_ADDRESS".into(),
        code:       None,
        class_only: true,
      })
      .await
      .unwrap();

    let block = Block {
      height:       2,
      transactions: vec![tx("invoke", json!({
        "invoke": { "scid": scid_hex(7), "args": [ { "name": "entrypoint", "value": "StartSwap" } ] },
        "writes": [ { "key": "k", "value": "v" } ]
      }))],
    };
    let batch = build_batch(&store, &filters(), &block).await.unwrap();
    assert!(batch.tag_merges.is_empty());
    assert_eq!(batch.variables.len(), 1);
  }
}
