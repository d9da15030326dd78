//! The scanner task: walks heights, builds batches, commits them.
//!
//! One scanner runs at a time, spawned by the controller for a single job
//! (forward scan or reclassification replay). It checks its directive before
//! every height and always flushes the store on the way out.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::watch;

use scindex_core::{
  chain::{Block, ChainSource},
  filter::FilterSet,
  ranges::CompletedRanges,
  settings::keys,
  store::{HeightBatch, IndexStore},
};
use scindex_store_sqlite::SqliteStore;

use crate::{Result, controller::PipelineConfig, status::ScanStatus, step::build_batch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Directive {
  Run,
  Pause,
  Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanJob {
  Forward,
  Replay { autostart: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScanOutcome {
  /// Left because the directive changed.
  Halted,
  /// Reclassification replay reached its target.
  Replayed { autostart: bool },
  Failed(String),
}

enum Fetched {
  Block(Block),
  /// Retries exhausted; the height is left as a gap.
  Gap,
  Halted,
}

pub(crate) struct Scanner<C> {
  pub store:     SqliteStore,
  pub chain:     Arc<C>,
  pub filters:   Arc<FilterSet>,
  pub config:    PipelineConfig,
  pub status:    Arc<watch::Sender<ScanStatus>>,
  pub directive: watch::Receiver<Directive>,
  /// Set when the directive sender is gone; treated as a stop.
  pub orphaned:  bool,
}

impl<C: ChainSource + 'static> Scanner<C> {
  pub(crate) async fn run(mut self, job: ScanJob) -> ScanOutcome {
    let result = match job {
      ScanJob::Forward => self.forward().await.map(|()| ScanOutcome::Halted),
      ScanJob::Replay { autostart } => self.replay().await.map(|finished| {
        if finished { ScanOutcome::Replayed { autostart } } else { ScanOutcome::Halted }
      }),
    };

    if let Err(e) = self.store.flush().await {
      tracing::warn!(error = %e, "flushing index store failed");
    }

    result.unwrap_or_else(|e| {
      tracing::error!(error = %e, "scanner stopped on storage error");
      ScanOutcome::Failed(e.to_string())
    })
  }

  fn halted(&self) -> bool { self.orphaned || *self.directive.borrow() != Directive::Run }

  /// Sleep for `delay`, waking early on a directive change.
  async fn sleep_or_halt(&mut self, delay: Duration) {
    tokio::select! {
      _ = tokio::time::sleep(delay) => {}
      changed = self.directive.changed() => {
        if changed.is_err() {
          self.orphaned = true;
        }
      }
    }
  }

  /// Sleep for one poll interval, waking early on a directive change.
  async fn idle_wait(&mut self) { self.sleep_or_halt(self.config.poll_interval).await }

  // ─── Jobs ────────────────────────────────────────────────────────────────

  async fn forward(&mut self) -> Result<()> {
    let mut ranges = self.store.completed_ranges().await?;
    let mut cursor = ranges.next_height();
    let mut since_flush = 0u64;
    tracing::info!(from = cursor, "forward scan started");

    while !self.halted() {
      let tip = match self.chain.tip_height().await {
        Ok(tip) => tip,
        Err(e) => {
          tracing::warn!(error = %e, "reading chain tip failed");
          self.idle_wait().await;
          continue;
        }
      };
      self.status.send_modify(|s| {
        s.chain_tip = Some(tip);
        s.updated_at = Utc::now();
      });

      if cursor > tip {
        self.idle_wait().await;
        continue;
      }

      while cursor <= tip && !self.halted() {
        if !self.index_height(cursor, &mut ranges).await? {
          break;
        }
        cursor += 1;

        since_flush += 1;
        if self.config.flush_every > 0 && since_flush >= self.config.flush_every {
          self.store.flush().await?;
          since_flush = 0;
        }
      }
    }

    tracing::info!(last_index = ranges.last_index(), "forward scan halted");
    Ok(())
  }

  /// Truncate and rebuild the index up to the reclassification target.
  ///
  /// Returns `false` when halted before reaching the target. The target is
  /// persisted first, so an interrupted replay resumes towards the same one.
  async fn replay(&mut self) -> Result<bool> {
    let saved = self.store.load_setting(keys::RECLASSIFY_TARGET).await?;
    let target = match saved.as_deref().map(str::parse::<u64>) {
      Some(Ok(target)) => Some(target),
      Some(Err(e)) => {
        tracing::warn!(error = %e, "ignoring malformed reclassify target");
        self.current_target().await?
      }
      None => self.current_target().await?,
    };
    let Some(target) = target else {
      tracing::info!("nothing indexed yet, reclassification is a no-op");
      return Ok(true);
    };

    tracing::info!(target, "reclassification started");
    self.store.save_setting(keys::RECLASSIFY_TARGET, &target.to_string()).await?;
    self.store.truncate_index().await?;

    let mut ranges = CompletedRanges::new();
    for height in 0..=target {
      if self.halted() || !self.index_height(height, &mut ranges).await? {
        tracing::info!(height, target, "reclassification interrupted");
        return Ok(false);
      }
    }

    self.store.delete_setting(keys::RECLASSIFY_TARGET).await?;
    tracing::info!(target, "reclassification finished");
    Ok(true)
  }

  async fn current_target(&self) -> Result<Option<u64>> {
    let ranges = self.store.completed_ranges().await?;
    Ok((!ranges.is_empty()).then(|| ranges.last_index()))
  }

  // ─── Per height ──────────────────────────────────────────────────────────

  /// Index one height. Returns `false`, leaving `height` untouched, when the
  /// directive changed while a fetch was being retried.
  async fn index_height(&mut self, height: u64, ranges: &mut CompletedRanges) -> Result<bool> {
    let block = match self.fetch_with_retry(height).await {
      Fetched::Block(block) => Some(block),
      Fetched::Gap => None,
      Fetched::Halted => return Ok(false),
    };
    if let Some(block) = block {
      let batch = build_batch(&self.store, &self.filters, &block).await?;
      tracing::debug!(
        height,
        contracts = batch.contracts.len(),
        variables = batch.variables.len(),
        "height indexed"
      );

      let mut next = ranges.clone();
      next.mark(height);
      self.commit(batch, next.clone()).await?;
      *ranges = next;
    }

    self.status.send_modify(|s| {
      s.height = Some(height);
      s.last_index = ranges.last_index();
      s.updated_at = Utc::now();
    });
    Ok(true)
  }

  /// Fetch with bounded retries. A pause or stop during the backoff ends
  /// the attempts early.
  async fn fetch_with_retry(&mut self, height: u64) -> Fetched {
    let policy = self.config.retry;
    let mut attempt = 0;
    loop {
      match self.chain.fetch_block(height).await {
        Ok(block) => return Fetched::Block(block),
        Err(e) if attempt < policy.max_retries => {
          let delay = policy.delay(attempt);
          tracing::debug!(height, attempt, ?delay, error = %e, "block fetch failed, retrying");
          self.sleep_or_halt(delay).await;
          if self.halted() {
            tracing::debug!(height, "fetch retries abandoned on directive change");
            return Fetched::Halted;
          }
          attempt += 1;
        }
        Err(e) => {
          tracing::warn!(height, attempts = attempt + 1, error = %e, "skipping height after repeated fetch failures");
          return Fetched::Gap;
        }
      }
    }
  }

  /// Commit one height with the ready gate lowered. On `StorageFull` the
  /// store is moved to disk and the same batch is committed again.
  async fn commit(&self, batch: HeightBatch, ranges: CompletedRanges) -> Result<()> {
    let retry = self
      .store
      .mode()
      .is_memory()
      .then(|| (batch.clone(), ranges.clone()));

    self.store.set_ready(false);
    let mut result = self.store.commit_height(batch, ranges).await;
    let storage_full = matches!(&result, Err(e) if e.is_storage_full());
    if let (true, Some((batch, ranges))) = (storage_full, retry) {
      tracing::warn!(height = batch.height, "memory budget exhausted, switching to disk mode");
      result = match self.store.switch_to_disk().await {
        Ok(()) => {
          self.status.send_modify(|s| s.mode = self.store.mode().label().to_owned());
          self.store.commit_height(batch, ranges).await
        }
        Err(e) => Err(e),
      };
    }
    self.store.set_ready(true);

    Ok(result?)
  }
}
