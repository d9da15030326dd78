//! [`SqliteStore`] is the SQLite implementation of [`IndexStore`].

use std::{
  collections::{BTreeMap, BTreeSet},
  path::{Path, PathBuf},
  sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use rusqlite::{DatabaseName, OptionalExtension as _, backup::Progress, params, params_from_iter};
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use scindex_core::{
  contract::{ContractRecord, ContractSummary, Scid, join_tags},
  ranges::CompletedRanges,
  settings::keys,
  store::{HeightBatch, IndexStore, ScDetails},
  variable::{ScVariable, SplitValues, VarKey, VarValue, VariableSnapshot},
};

use crate::{
  Error, Result,
  encode::{
    RawContract, RawVariable, decode_height, decode_key, decode_value, encode_height, encode_key,
    encode_scid, encode_value,
  },
  mode::StorageMode,
  schema::{DISK_PRAGMAS, SCHEMA},
};

type NoProgress = fn(Progress);

/// Tables copied when a backing file is restored into memory.
const RESTORED_TABLES: [&str; 3] = ["contracts", "variables", "settings"];

const READER_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Optimistic attempts a memory-mode read makes before it is run on the
/// writer connection instead.
const READ_ATTEMPTS: u32 = 8;

const UPSERT_SETTING: &str = "INSERT INTO settings (key, value) VALUES (?1, ?2)
   ON CONFLICT(key) DO UPDATE SET value = excluded.value";

// ─── Store ───────────────────────────────────────────────────────────────────

/// Writer and reader connections to the same database.
///
/// Ingestion writes go through `writer`; queries go through `reader`, so a
/// long read runs in its own transaction and never queues ahead of a commit.
struct Backend {
  writer: tokio_rusqlite::Connection,
  reader: tokio_rusqlite::Connection,
  mode:   StorageMode,
}

/// Counts writes started and finished on the writer connection.
///
/// Both counters move on the writer's own thread, around the statements
/// themselves. A read that starts with the two equal and ends with `started`
/// unchanged overlapped no write.
#[derive(Default)]
struct WriteClock {
  started:  AtomicU64,
  finished: AtomicU64,
}

impl WriteClock {
  fn begin(&self) -> WriteTicket<'_> {
    self.started.fetch_add(1, Ordering::SeqCst);
    WriteTicket(self)
  }

  /// `started` when no write is in flight.
  fn quiet(&self) -> Option<u64> {
    let started = self.started.load(Ordering::SeqCst);
    (self.finished.load(Ordering::SeqCst) == started).then_some(started)
  }

  fn unchanged_since(&self, started: u64) -> bool { self.started.load(Ordering::SeqCst) == started }
}

struct WriteTicket<'a>(&'a WriteClock);

impl Drop for WriteTicket<'_> {
  fn drop(&mut self) { self.0.finished.fetch_add(1, Ordering::SeqCst); }
}

type DbResult<T> = std::result::Result<T, tokio_rusqlite::Error>;

/// A contract index backed by SQLite, either on disk or in memory with a
/// backing file.
///
/// Cloning is cheap and every clone shares the same backend, so switching
/// from memory to disk mode is observed by all holders.
#[derive(Clone)]
pub struct SqliteStore {
  backend: Arc<RwLock<Backend>>,
  backing: Option<Arc<PathBuf>>,
  ready:   Arc<watch::Sender<bool>>,
  writes:  Arc<WriteClock>,
}

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(0);

/// URI of a fresh shared-cache in-memory database, unique in this process.
fn memory_uri() -> String {
  format!(
    "file:scindex-mem-{}-{}?mode=memory&cache=shared",
    std::process::id(),
    NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed)
  )
}

impl SqliteStore {
  /// Open (or create) a disk-mode store at `path`.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with_mode(path, StorageMode::Disk).await
  }

  /// Open a purely in-memory store with no backing file and no budget.
  pub async fn open_in_memory() -> Result<Self> {
    let uri = memory_uri();
    let writer = tokio_rusqlite::Connection::open(&uri).await?;
    init_connection(&writer, false).await?;
    let reader = open_reader(&uri, false).await?;
    Ok(Self::from_parts(writer, reader, StorageMode::Memory { budget_mb: 0 }, None))
  }

  /// Open the store at `path` in the given mode.
  ///
  /// In memory mode an existing file is restored into RAM first and the
  /// page budget is applied afterwards; the file is only written again by
  /// [`SqliteStore::flush`].
  pub async fn open_with_mode(path: impl AsRef<Path>, mode: StorageMode) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let (writer, reader) = match mode {
      StorageMode::Disk => open_disk_pair(&path).await?,
      StorageMode::Memory { budget_mb } => {
        let uri = memory_uri();
        let writer = tokio_rusqlite::Connection::open(&uri).await?;
        init_connection(&writer, false).await?;
        if path.exists() {
          restore_into(&writer, path.clone()).await?;
        }
        if budget_mb > 0 {
          apply_budget(&writer, budget_mb).await?;
        }
        (writer, open_reader(&uri, false).await?)
      }
    };

    let store = Self::from_parts(writer, reader, mode, Some(path));
    tracing::debug!(mode = store.mode().label(), path = ?store.backing_path(), "index store opened");
    Ok(store)
  }

  fn from_parts(
    writer: tokio_rusqlite::Connection,
    reader: tokio_rusqlite::Connection,
    mode: StorageMode,
    backing: Option<PathBuf>,
  ) -> Self {
    let (ready, _) = watch::channel(true);
    Self {
      backend: Arc::new(RwLock::new(Backend { writer, reader, mode })),
      backing: backing.map(Arc::new),
      ready:   Arc::new(ready),
      writes:  Arc::default(),
    }
  }

  fn backend(&self) -> (tokio_rusqlite::Connection, StorageMode) {
    let guard = self.backend.read().unwrap_or_else(|p| p.into_inner());
    (guard.writer.clone(), guard.mode)
  }

  fn conn(&self) -> tokio_rusqlite::Connection { self.backend().0 }

  fn reader(&self) -> tokio_rusqlite::Connection {
    let guard = self.backend.read().unwrap_or_else(|p| p.into_inner());
    guard.reader.clone()
  }

  /// Run `op` on the writer connection as one counted write.
  async fn write<T, F>(&self, op: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> DbResult<T> + Send + 'static,
  {
    let (conn, mode) = self.backend();
    let clock = Arc::clone(&self.writes);
    conn
      .call(move |conn| {
        let _ticket = clock.begin();
        op(conn)
      })
      .await
      .map_err(|e| Error::from_db(e, mode.budget_mb()))
  }

  /// Run `query` on the reader connection.
  ///
  /// On disk the reader sees a WAL snapshot. In memory it sees pages as the
  /// writer changes them, so a result is kept only if no write ran while the
  /// query did; otherwise the query is repeated, and after
  /// [`READ_ATTEMPTS`] it is queued on the writer connection.
  async fn read<T, F>(&self, query: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> DbResult<T> + Clone + Send + 'static,
  {
    let (reader, mode) = {
      let guard = self.backend.read().unwrap_or_else(|p| p.into_inner());
      (guard.reader.clone(), guard.mode)
    };
    if !mode.is_memory() {
      return Ok(reader.call(query).await?);
    }

    for attempt in 0..READ_ATTEMPTS {
      if let Some(started) = self.writes.quiet() {
        let result = reader.call(query.clone()).await;
        if self.writes.unchanged_since(started) {
          return Ok(result?);
        }
      }
      tokio::time::sleep(Duration::from_millis(1 << attempt)).await;
    }
    tracing::debug!("read kept overlapping writes, queueing it on the writer");
    Ok(self.conn().call(query).await?)
  }

  // ─── Mode management ─────────────────────────────────────────────────────

  pub fn mode(&self) -> StorageMode { self.backend().1 }

  pub fn backing_path(&self) -> Option<&Path> { self.backing.as_deref().map(PathBuf::as_path) }

  /// Write an in-memory database to its backing file. No-op in disk mode
  /// and for stores without a backing file.
  pub async fn flush(&self) -> Result<()> {
    let (conn, mode) = self.backend();
    let (Some(path), true) = (self.backing.clone(), mode.is_memory()) else {
      return Ok(());
    };
    conn
      .call(move |conn| {
        conn.backup(DatabaseName::Main, path.as_path(), None::<NoProgress>)?;
        Ok(())
      })
      .await?;
    tracing::debug!("memory index flushed to disk");
    Ok(())
  }

  /// Flush the in-memory database and reopen the backing file in disk mode.
  ///
  /// All clones of this store pick up the new backend.
  pub async fn switch_to_disk(&self) -> Result<()> {
    if !self.mode().is_memory() {
      return Ok(());
    }
    let Some(path) = self.backing.clone() else {
      return Err(Error::NoBackingFile);
    };

    self.flush().await?;
    let (writer, reader) = open_disk_pair(path.as_path()).await?;

    let old = {
      let mut guard = self.backend.write().unwrap_or_else(|p| p.into_inner());
      let old_writer = std::mem::replace(&mut guard.writer, writer);
      let old_reader = std::mem::replace(&mut guard.reader, reader);
      guard.mode = StorageMode::Disk;
      [old_reader, old_writer]
    };
    for conn in old {
      if let Err(e) = conn.close().await {
        tracing::warn!(error = %e, "closing in-memory connection failed");
      }
    }
    tracing::info!(path = %path.display(), "index store switched to disk mode");
    Ok(())
  }

  /// Flush if needed and close both connections.
  pub async fn close(self) -> Result<()> {
    self.flush().await?;
    self.reader().close().await?;
    self.conn().close().await?;
    Ok(())
  }

  // ─── Ready gate ──────────────────────────────────────────────────────────

  /// Mark the store (not) ready for the distinct-value aggregations.
  pub fn set_ready(&self, ready: bool) { self.ready.send_replace(ready); }

  pub fn is_ready(&self) -> bool { *self.ready.borrow() }

  /// Wait until [`SqliteStore::set_ready`] was last called with `true`.
  pub async fn wait_ready(&self) {
    let mut rx = self.ready.subscribe();
    // The sender lives as long as `self`, so this cannot fail.
    let _ = rx.wait_for(|ready| *ready).await;
  }

  // ─── Digest ──────────────────────────────────────────────────────────────

  /// SHA-256 over every contract and variable row in primary-key order.
  ///
  /// Two stores with the same digest hold identical index content.
  pub async fn table_digest(&self) -> Result<String> {
    let digest = self
      .read(|conn| {
        let mut hasher = Sha256::new();
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM contracts ORDER BY scid",
          RawContract::COLUMNS
        ))?;
        let rows = stmt.query_map([], RawContract::from_row)?;
        for row in rows {
          let c = row?;
          for field in [&c.scid, &c.owner, &c.height.to_string(), &c.class, &c.tags] {
            hasher.update(field.as_bytes());
            hasher.update([0]);
          }
          hasher.update(c.code.as_deref().unwrap_or("\u{1}").as_bytes());
          hasher.update([u8::from(c.class_only), b'\n']);
        }

        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM variables ORDER BY scid, key_kind, key, topoheight",
          RawVariable::COLUMNS
        ))?;
        let rows = stmt.query_map([], RawVariable::from_row)?;
        for row in rows {
          let v = row?;
          for field in [&v.scid, &v.key_kind, &v.key, &v.value_kind, &v.value, &v.topoheight.to_string()] {
            hasher.update(field.as_bytes());
            hasher.update([0]);
          }
          hasher.update(b"\n");
        }
        Ok(hex::encode(hasher.finalize()))
      })
      .await?;
    Ok(digest)
  }

  // ─── Internal reads ──────────────────────────────────────────────────────

  async fn contracts_where(
    &self,
    clause: String,
    args: Vec<String>,
  ) -> Result<Vec<ContractRecord>> {
    let raws: Vec<RawContract> = self
      .read(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM contracts WHERE {clause} ORDER BY height, scid",
          RawContract::COLUMNS
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), RawContract::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
      })
      .await?;
    raws.into_iter().map(RawContract::into_record).collect()
  }

  async fn variables_at(&self, scid: Scid, height: u64) -> Result<Vec<ScVariable>> {
    let scid_str = encode_scid(scid);
    let h = encode_height(height);
    let raws: Vec<RawVariable> = self
      .read(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT v.scid, v.key_kind, v.key, v.value_kind, v.value, v.topoheight
             FROM variables v
             JOIN (SELECT key_kind, key, MAX(topoheight) AS top
                     FROM variables
                    WHERE scid = ?1 AND topoheight <= ?2
                    GROUP BY key_kind, key) latest
               ON v.key_kind = latest.key_kind
              AND v.key = latest.key
              AND v.topoheight = latest.top
            WHERE v.scid = ?1",
        )?;
        let rows = stmt.query_map(params![scid_str, h], RawVariable::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
      })
      .await?;

    let mut vars = raws
      .into_iter()
      .map(RawVariable::into_variable)
      .collect::<Result<Vec<_>>>()?;
    vars.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(vars)
  }

  /// Keep a read transaction open on the query connection for `held`.
  #[cfg(test)]
  pub(crate) async fn hold_read(&self, held: Duration) -> Result<()> {
    self
      .reader()
      .call(move |conn| {
        let tx = conn.transaction()?;
        let _rows: i64 = tx.query_row("SELECT COUNT(*) FROM variables", [], |r| r.get(0))?;
        std::thread::sleep(held);
        Ok(())
      })
      .await?;
    Ok(())
  }
}

async fn init_connection(conn: &tokio_rusqlite::Connection, disk: bool) -> Result<()> {
  conn
    .call(move |conn| {
      if disk {
        conn.execute_batch(DISK_PRAGMAS)?;
      }
      conn.execute_batch(SCHEMA)?;
      Ok(())
    })
    .await?;
  Ok(())
}

async fn open_disk_pair(
  path: &Path,
) -> Result<(tokio_rusqlite::Connection, tokio_rusqlite::Connection)> {
  let writer = tokio_rusqlite::Connection::open(path).await?;
  init_connection(&writer, true).await?;
  let reader = open_reader(path, true).await?;
  Ok((writer, reader))
}

/// Open the query connection. It refuses writes; on disk it reads WAL
/// snapshots.
async fn open_reader(target: impl AsRef<Path>, disk: bool) -> Result<tokio_rusqlite::Connection> {
  let reader = tokio_rusqlite::Connection::open(target).await?;
  reader
    .call(move |conn| {
      // Shared-cache readers take no table locks, so an open read never
      // blocks the writer.
      if !disk {
        conn.execute_batch("PRAGMA read_uncommitted = ON;")?;
      }
      conn.execute_batch("PRAGMA query_only = ON;")?;
      conn.busy_timeout(READER_BUSY_TIMEOUT)?;
      Ok(())
    })
    .await?;
  Ok(reader)
}

async fn apply_budget(conn: &tokio_rusqlite::Connection, budget_mb: u64) -> Result<()> {
  let pages = conn
    .call(move |conn| {
      let page_size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
      let budget = i64::try_from(budget_mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX);
      let pages = (budget / page_size.max(1)).max(1);
      let applied: i64 =
        conn.query_row(&format!("PRAGMA max_page_count = {pages}"), [], |r| r.get(0))?;
      Ok(applied)
    })
    .await?;
  tracing::debug!(budget_mb, pages, "memory budget applied");
  Ok(())
}

/// Copy the index tables of the file at `path` into `conn`.
///
/// The file is attached read-only; its journal mode and contents are left
/// untouched.
async fn restore_into(conn: &tokio_rusqlite::Connection, path: PathBuf) -> Result<()> {
  let uri = read_only_uri(&path);
  let rows = conn
    .call(move |conn| {
      conn.execute("ATTACH DATABASE ?1 AS source", params![uri])?;
      let copied = copy_tables(conn);
      conn.execute("DETACH DATABASE source", [])?;
      Ok(copied?)
    })
    .await?;
  tracing::debug!(path = %path.display(), rows, "index restored into memory");
  Ok(())
}

fn copy_tables(conn: &mut rusqlite::Connection) -> rusqlite::Result<usize> {
  let tx = conn.transaction()?;
  let mut rows = 0;
  for table in RESTORED_TABLES {
    let present: bool = tx.query_row(
      "SELECT EXISTS (SELECT 1 FROM source.sqlite_master WHERE type = 'table' AND name = ?1)",
      params![table],
      |r| r.get(0),
    )?;
    if present {
      rows += tx.execute(
        &format!("INSERT OR REPLACE INTO main.{table} SELECT * FROM source.{table}"),
        [],
      )?;
    }
  }
  tx.commit()?;
  Ok(rows)
}

/// `file:` URI opening `path` read-only.
fn read_only_uri(path: &Path) -> String {
  let mut uri = String::from("file:");
  for c in path.to_string_lossy().chars() {
    match c {
      '%' => uri.push_str("%25"),
      '?' => uri.push_str("%3f"),
      '#' => uri.push_str("%23"),
      c => uri.push(c),
    }
  }
  uri.push_str("?mode=ro");
  uri
}

fn tag_clause(count: usize) -> String {
  (1..=count)
    .map(|i| format!("instr(tags, ?{i}) > 0"))
    .collect::<Vec<_>>()
    .join(" OR ")
}

fn clean(list: Vec<String>) -> Vec<String> {
  list
    .into_iter()
    .map(|s| s.trim().to_owned())
    .filter(|s| !s.is_empty())
    .collect()
}

// ─── IndexStore impl ─────────────────────────────────────────────────────────

impl IndexStore for SqliteStore {
  type Error = Error;

  async fn put_contract(&self, record: ContractRecord) -> Result<()> {
    self
      .write(move |conn| {
        insert_contract(conn, &record)?;
        Ok(())
      })
      .await
  }

  async fn put_variable(&self, snapshot: VariableSnapshot) -> Result<()> {
    self
      .write(move |conn| {
        insert_variable(conn, &snapshot)?;
        Ok(())
      })
      .await
  }

  async fn commit_height(&self, batch: HeightBatch, ranges: CompletedRanges) -> Result<()> {
    let ranges_json = ranges.to_json();
    self
      .write(move |conn| {
        let tx = conn.transaction()?;

        for record in &batch.contracts {
          insert_contract(&tx, record)?;
        }

        for merge in &batch.tag_merges {
          let current: Option<(String, String, bool)> = tx
            .query_row(
              "SELECT class, tags, class_only FROM contracts WHERE scid = ?1",
              params![encode_scid(merge.scid)],
              |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
          // Class-only records keep the tags they were classified with.
          if let Some((class, tags, false)) = current {
            let merged = join_tags(tags.split(',').chain(merge.tags.split(',')));
            let class = if class.is_empty() { merge.class.clone() } else { class };
            tx.execute(
              "UPDATE contracts SET class = ?2, tags = ?3 WHERE scid = ?1",
              params![encode_scid(merge.scid), class, merged],
            )?;
          }
        }

        for snapshot in &batch.variables {
          insert_variable(&tx, snapshot)?;
        }

        tx.execute(UPSERT_SETTING, params![keys::COMPLETED, ranges_json])?;
        tx.commit()?;
        Ok(())
      })
      .await
  }

  async fn truncate_index(&self) -> Result<()> {
    self
      .write(|conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM contracts", [])?;
        tx.execute("DELETE FROM variables", [])?;
        tx.execute("DELETE FROM settings WHERE key = ?1", params![keys::COMPLETED])?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn load_setting<'a>(&'a self, key: &'a str) -> Result<Option<String>> {
    let key = key.to_owned();
    let value = self
      .read(move |conn| {
        Ok(
          conn
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?,
        )
      })
      .await?;
    Ok(value)
  }

  async fn save_setting<'a>(&'a self, key: &'a str, value: &'a str) -> Result<()> {
    let (key, value) = (key.to_owned(), value.to_owned());
    self
      .write(move |conn| {
        conn.execute(UPSERT_SETTING, params![key, value])?;
        Ok(())
      })
      .await
  }

  async fn delete_setting<'a>(&'a self, key: &'a str) -> Result<()> {
    let key = key.to_owned();
    self
      .write(move |conn| {
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn completed_ranges(&self) -> Result<CompletedRanges> {
    let raw = self.load_setting(keys::COMPLETED).await?;
    Ok(CompletedRanges::from_json(raw.as_deref().unwrap_or(""))?)
  }

  async fn get_last_index_height(&self) -> Result<u64> {
    Ok(self.completed_ranges().await?.last_index())
  }

  async fn get_contract(&self, scid: Scid) -> Result<Option<ContractRecord>> {
    let mut found = self
      .contracts_where("scid = ?1".into(), vec![encode_scid(scid)])
      .await?;
    Ok(found.pop())
  }

  async fn get_all_owners_and_scids(&self) -> Result<BTreeMap<Scid, String>> {
    let all = self.contracts_where("1 = 1".into(), Vec::new()).await?;
    Ok(all.into_iter().map(|c| (c.scid, c.owner)).collect())
  }

  async fn get_sc(&self, scid: Scid) -> Result<ScDetails> {
    let last = self.get_last_index_height().await?;
    let code = self.get_initial_scid_code(scid).await?;
    let variables = self.variables_at(scid, last).await?;
    Ok(ScDetails { code, variables })
  }

  async fn get_initial_scid_code(&self, scid: Scid) -> Result<String> {
    let scid_str = encode_scid(scid);
    let code: Option<Option<String>> = self
      .read(move |conn| {
        Ok(
          conn
            .query_row("SELECT code FROM contracts WHERE scid = ?1", params![scid_str], |r| r.get(0))
            .optional()?,
        )
      })
      .await?;
    Ok(code.flatten().unwrap_or_default())
  }

  async fn get_all_scid_variable_details(&self, scid: Scid) -> Result<Vec<VariableSnapshot>> {
    let scid_str = encode_scid(scid);
    let raws: Vec<RawVariable> = self
      .read(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM variables WHERE scid = ?1 ORDER BY topoheight",
          RawVariable::COLUMNS
        ))?;
        let rows = stmt.query_map(params![scid_str], RawVariable::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
      })
      .await?;

    let mut snapshots = raws
      .into_iter()
      .map(RawVariable::into_snapshot)
      .collect::<Result<Vec<_>>>()?;
    snapshots.sort_by(|a, b| a.topoheight.cmp(&b.topoheight).then_with(|| a.key.cmp(&b.key)));
    Ok(snapshots)
  }

  async fn get_scid_variable_details_at_topoheight(
    &self,
    scid: Scid,
    height: u64,
  ) -> Result<Vec<ScVariable>> {
    self.variables_at(scid, height).await
  }

  async fn get_scid_interaction_height(&self, scid: Scid) -> Result<Vec<u64>> {
    let scid_str = encode_scid(scid);
    let heights: Vec<i64> = self
      .read(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT DISTINCT topoheight FROM variables WHERE scid = ?1 ORDER BY topoheight",
        )?;
        let rows = stmt.query_map(params![scid_str], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
      })
      .await?;
    heights.into_iter().map(decode_height).collect()
  }

  async fn get_scid_values_by_key(
    &self,
    scid: Scid,
    key: VarKey,
    height: u64,
    match_all: bool,
  ) -> Result<SplitValues> {
    let scid_str = encode_scid(scid);
    let (kind, text) = encode_key(&key);
    let h = encode_height(height);
    let sql = if match_all {
      "SELECT value_kind, value FROM variables
        WHERE scid = ?1 AND key_kind = ?2 AND key = ?3 AND topoheight <= ?4
        ORDER BY topoheight"
    } else {
      "SELECT value_kind, value FROM variables
        WHERE scid = ?1 AND key_kind = ?2 AND key = ?3 AND topoheight <= ?4
        ORDER BY topoheight DESC LIMIT 1"
    };

    let rows: Vec<(String, String)> = self
      .read(move |conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![scid_str, kind, text, h], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
      })
      .await?;

    let mut out = SplitValues::default();
    for (kind, text) in rows {
      out.push_value(decode_value(&kind, text)?);
    }
    Ok(out)
  }

  async fn get_scid_keys_by_value(
    &self,
    scid: Scid,
    value: VarValue,
    height: u64,
    match_all: bool,
  ) -> Result<SplitValues> {
    let mut out = SplitValues::default();

    if !match_all {
      for var in self.variables_at(scid, height).await? {
        if var.value == value {
          out.push_key(var.key);
        }
      }
      return Ok(out);
    }

    let scid_str = encode_scid(scid);
    let (kind, text) = encode_value(&value);
    let h = encode_height(height);
    let rows: Vec<(String, String)> = self
      .read(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT key_kind, key FROM variables
            WHERE scid = ?1 AND value_kind = ?2 AND value = ?3 AND topoheight <= ?4
            ORDER BY topoheight, key_kind, key",
        )?;
        let rows = stmt.query_map(params![scid_str, kind, text, h], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
      })
      .await?;

    for (kind, text) in rows {
      out.push_key(decode_key(&kind, text)?);
    }
    Ok(out)
  }

  async fn get_scids_by_class(&self, classes: Vec<String>) -> Result<Vec<Scid>> {
    let classes = clean(classes);
    if classes.is_empty() {
      return Ok(Vec::new());
    }
    let placeholders = (1..=classes.len())
      .map(|i| format!("?{i}"))
      .collect::<Vec<_>>()
      .join(", ");
    let found = self
      .contracts_where(format!("class IN ({placeholders})"), classes)
      .await?;
    Ok(found.into_iter().map(|c| c.scid).collect())
  }

  async fn get_scids_by_tags(&self, tags: Vec<String>) -> Result<Vec<Scid>> {
    let tags = clean(tags);
    if tags.is_empty() {
      return Ok(Vec::new());
    }
    let found = self.contracts_where(tag_clause(tags.len()), tags).await?;
    Ok(found.into_iter().map(|c| c.scid).collect())
  }

  async fn get_scs_by_tags(&self, tags: Vec<String>) -> Result<BTreeMap<Scid, ContractSummary>> {
    let tags = clean(tags);
    if tags.is_empty() {
      return Ok(BTreeMap::new());
    }
    let found = self.contracts_where(tag_clause(tags.len()), tags).await?;
    Ok(found.into_iter().map(|c| (c.scid, c.summary())).collect())
  }

  async fn distinct_classes(&self) -> Result<Vec<String>> {
    self.wait_ready().await;
    let classes = self
      .read(|conn| {
        let mut stmt =
          conn.prepare("SELECT DISTINCT class FROM contracts WHERE class != '' ORDER BY class")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
      })
      .await?;
    Ok(classes)
  }

  async fn distinct_tags(&self) -> Result<Vec<String>> {
    self.wait_ready().await;
    let joined = self
      .read(|conn| {
        let mut stmt = conn.prepare("SELECT DISTINCT tags FROM contracts WHERE tags != ''")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
      })
      .await?;
    let set: BTreeSet<String> = joined
      .iter()
      .flat_map(|t| t.split(','))
      .map(str::trim)
      .filter(|t| !t.is_empty())
      .map(str::to_owned)
      .collect();
    Ok(set.into_iter().collect())
  }

  async fn size_bytes(&self) -> Result<u64> {
    let bytes = self
      .read(|conn| {
        let count: i64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let size: i64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        Ok(count.saturating_mul(size))
      })
      .await?;
    Ok(u64::try_from(bytes).unwrap_or(0))
  }
}

// ─── Row writers ─────────────────────────────────────────────────────────────

fn insert_contract(conn: &rusqlite::Connection, record: &ContractRecord) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT OR REPLACE INTO contracts (scid, owner, height, class, tags, code, class_only)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    params![
      encode_scid(record.scid),
      record.owner,
      encode_height(record.height),
      record.class,
      record.tags,
      record.code,
      record.class_only,
    ],
  )?;
  Ok(())
}

fn insert_variable(conn: &rusqlite::Connection, snapshot: &VariableSnapshot) -> rusqlite::Result<()> {
  let (key_kind, key) = encode_key(&snapshot.key);
  let (value_kind, value) = encode_value(&snapshot.value);
  conn.execute(
    "INSERT OR REPLACE INTO variables (scid, key_kind, key, value_kind, value, topoheight)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    params![
      encode_scid(snapshot.scid),
      key_kind,
      key,
      value_kind,
      value,
      encode_height(snapshot.topoheight),
    ],
  )?;
  Ok(())
}
