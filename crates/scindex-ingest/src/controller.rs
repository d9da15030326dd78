//! The controller actor and its handle.
//!
//! The controller owns the pipeline state machine, the store, the filter set
//! and the chain source. Everything else talks to it through an
//! [`IndexerHandle`], which sends [`Command`]s over an mpsc channel and waits
//! for the oneshot reply.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
  sync::{mpsc, oneshot, watch},
  task::JoinHandle,
};

use scindex_core::{
  chain::ChainSource,
  filter::FilterSet,
  settings::{RuntimeSettings, keys},
  store::IndexStore,
};
use scindex_store_sqlite::{SettingsStore, SqliteStore};

use crate::{
  Error, Result,
  backoff::RetryPolicy,
  scanner::{Directive, ScanJob, ScanOutcome, Scanner},
  status::{PipelineState, ScanStatus},
};

/// Tuning knobs for the scanner.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// How long to wait before polling the chain tip again once caught up.
  pub poll_interval: Duration,
  pub retry:         RetryPolicy,
  /// Flush a memory-mode store every this many heights; 0 disables.
  pub flush_every:   u64,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_secs(2),
      retry:         RetryPolicy::default(),
      flush_every:   1_000,
    }
  }
}

// ─── Commands and handle ─────────────────────────────────────────────────────

type Reply<T = ()> = oneshot::Sender<Result<T>>;

/// Messages accepted by the controller.
#[derive(Debug)]
pub enum Command {
  Start { reply: Reply },
  Pause { reply: Reply },
  Resume { reply: Reply },
  Reclassify { autostart: bool, reply: Reply },
  /// Persist a new RAM budget. The storage mode is chosen when the pipeline
  /// is constructed, so the budget applies from the next run.
  SetRamSize { mb: u64, reply: Reply },
  Status { reply: oneshot::Sender<ScanStatus> },
  Shutdown { reply: oneshot::Sender<()> },
}

/// Cheap, cloneable handle to the controller.
#[derive(Clone)]
pub struct IndexerHandle {
  tx:     mpsc::Sender<Command>,
  status: watch::Receiver<ScanStatus>,
}

impl IndexerHandle {
  async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self.tx.send(make(reply)).await.map_err(|_| Error::Stopped)?;
    rx.await.map_err(|_| Error::Stopped)
  }

  /// Begin forward scanning. Succeeds immediately when already running.
  pub async fn start(&self) -> Result<()> { self.request(|reply| Command::Start { reply }).await? }

  /// Pause after the in-flight height commits.
  pub async fn pause(&self) -> Result<()> { self.request(|reply| Command::Pause { reply }).await? }

  pub async fn resume(&self) -> Result<()> { self.request(|reply| Command::Resume { reply }).await? }

  /// Start a reclassification. Returns once the replay is under way; use
  /// [`IndexerHandle::wait_for`] to await completion.
  pub async fn reclassify(&self, autostart: bool) -> Result<()> {
    self.request(|reply| Command::Reclassify { autostart, reply }).await?
  }

  pub async fn set_ram_size(&self, mb: u64) -> Result<()> {
    self.request(|reply| Command::SetRamSize { mb, reply }).await?
  }

  pub async fn status(&self) -> Result<ScanStatus> {
    self.request(|reply| Command::Status { reply }).await
  }

  /// Stop scanning, flush, and end the controller task.
  pub async fn shutdown(&self) -> Result<()> {
    self.request(|reply| Command::Shutdown { reply }).await
  }

  /// Latest published status without a round trip to the controller.
  pub fn latest_status(&self) -> ScanStatus { self.status.borrow().clone() }

  /// Wait until the published status satisfies `pred`.
  pub async fn wait_for(&self, pred: impl FnMut(&ScanStatus) -> bool) -> Result<ScanStatus> {
    let mut rx = self.status.clone();
    let status = rx.wait_for(pred).await.map_err(|_| Error::Stopped)?;
    Ok((*status).clone())
  }
}

// ─── Controller ──────────────────────────────────────────────────────────────

struct ScanTask {
  directive: watch::Sender<Directive>,
  handle:    JoinHandle<ScanOutcome>,
}

struct Controller<C> {
  store:    SqliteStore,
  settings: SettingsStore,
  runtime:  RuntimeSettings,
  filters:  Arc<FilterSet>,
  chain:    Arc<C>,
  config:   PipelineConfig,
  status:   Arc<watch::Sender<ScanStatus>>,
  rx:       mpsc::Receiver<Command>,
  scan:     Option<ScanTask>,
}

/// Spawn the controller task for an opened store and return its handle.
///
/// The pipeline starts `Idle`; call [`IndexerHandle::start`] to scan.
pub async fn spawn_indexer<C>(
  store: SqliteStore,
  settings: SettingsStore,
  runtime: RuntimeSettings,
  chain: C,
  config: PipelineConfig,
) -> Result<IndexerHandle>
where
  C: ChainSource + 'static,
{
  let filters = FilterSet::compile(&runtime.filters)?;
  let last_index = store.get_last_index_height().await?;
  let (status_tx, status_rx) = watch::channel(ScanStatus::new(store.mode().label(), last_index));
  let (tx, rx) = mpsc::channel(32);

  let controller = Controller {
    store,
    settings,
    runtime,
    filters: Arc::new(filters),
    chain: Arc::new(chain),
    config,
    status: Arc::new(status_tx),
    rx,
    scan: None,
  };
  tokio::spawn(controller.run());

  Ok(IndexerHandle { tx, status: status_rx })
}

async fn join_scan(scan: &mut Option<ScanTask>) -> ScanOutcome {
  match scan {
    Some(task) => (&mut task.handle)
      .await
      .unwrap_or_else(|e| ScanOutcome::Failed(format!("scanner task failed: {e}"))),
    None => std::future::pending().await,
  }
}

impl<C: ChainSource + 'static> Controller<C> {
  async fn run(mut self) {
    tracing::info!(mode = self.store.mode().label(), "indexer controller started");

    loop {
      tokio::select! {
        cmd = self.rx.recv() => match cmd {
          Some(Command::Shutdown { reply }) => {
            self.shutdown().await;
            let _ = reply.send(());
            break;
          }
          Some(cmd) => self.handle(cmd).await,
          None => {
            self.shutdown().await;
            break;
          }
        },
        outcome = join_scan(&mut self.scan), if self.scan.is_some() => {
          self.scan = None;
          self.on_scan_exit(outcome);
        }
      }
    }

    tracing::info!("indexer controller stopped");
  }

  fn state(&self) -> PipelineState { self.status.borrow().state }

  fn set_state(&self, state: PipelineState) {
    self.status.send_modify(|s| {
      s.state = state;
      s.updated_at = Utc::now();
    });
  }

  async fn handle(&mut self, cmd: Command) {
    match cmd {
      Command::Start { reply } => {
        let result = match self.state() {
          PipelineState::Idle => self.start_from_idle().await,
          PipelineState::Paused => {
            self.begin(ScanJob::Forward, PipelineState::Running);
            Ok(())
          }
          PipelineState::Running => Ok(()),
          PipelineState::Reclassifying => Err(Error::Busy("indexer is reclassifying")),
        };
        let _ = reply.send(result);
      }

      Command::Pause { reply } => {
        let result = match self.state() {
          PipelineState::Running => {
            self.halt(Directive::Pause).await;
            self.set_state(PipelineState::Paused);
            tracing::info!("indexer paused");
            Ok(())
          }
          _ => Err(Error::Busy("indexer is still starting up or not running")),
        };
        let _ = reply.send(result);
      }

      Command::Resume { reply } => {
        let result = match self.state() {
          PipelineState::Paused => {
            self.begin(ScanJob::Forward, PipelineState::Running);
            tracing::info!("indexer resumed");
            Ok(())
          }
          PipelineState::Running => Ok(()),
          PipelineState::Idle => Err(Error::Busy("indexer is not paused")),
          PipelineState::Reclassifying => Err(Error::Busy("indexer is reclassifying")),
        };
        let _ = reply.send(result);
      }

      Command::Reclassify { autostart, reply } => {
        let result = match self.state() {
          PipelineState::Idle => {
            self.reload_filters().await;
            self.begin(ScanJob::Replay { autostart }, PipelineState::Reclassifying);
            Ok(())
          }
          _ => Err(Error::Busy("indexer must be stopped before reclassifying")),
        };
        let _ = reply.send(result);
      }

      Command::SetRamSize { mb, reply } => {
        let result = self.settings.save(keys::RAM_SIZE_MB, &mb.to_string()).await;
        if result.is_ok() {
          self.runtime.ram_size_mb = mb;
          tracing::info!(ram_size_mb = mb, "RAM budget saved, applies from the next run");
        }
        let _ = reply.send(result.map_err(Error::from));
      }

      Command::Status { reply } => {
        let _ = reply.send(self.status.borrow().clone());
      }

      // Handled by the run loop.
      Command::Shutdown { reply } => {
        let _ = reply.send(());
      }
    }
  }

  /// Re-read the `Filters` setting, keeping the current set when it is
  /// unreadable or invalid.
  async fn reload_filters(&mut self) {
    let runtime = match self.settings.runtime_settings(&self.runtime).await {
      Ok(runtime) => runtime,
      Err(e) => {
        tracing::warn!(error = %e, "reading settings failed, keeping current filters");
        return;
      }
    };
    match FilterSet::compile(&runtime.filters) {
      Ok(filters) => {
        tracing::debug!(rules = filters.len(), "filters loaded");
        self.filters = Arc::new(filters);
        self.runtime = runtime;
      }
      Err(e) => tracing::warn!(error = %e, "invalid filters, keeping current set"),
    }
  }

  /// Begin forward scanning, first finishing a reclassification that was
  /// interrupted after truncating the index.
  async fn start_from_idle(&mut self) -> Result<()> {
    self.reload_filters().await;
    if let Some(saved) = self.store.load_setting(keys::RECLASSIFY_TARGET).await? {
      tracing::info!(target_height = %saved, "finishing interrupted reclassification before scanning");
      self.begin(ScanJob::Replay { autostart: true }, PipelineState::Reclassifying);
    } else {
      self.begin(ScanJob::Forward, PipelineState::Running);
    }
    Ok(())
  }

  fn begin(&mut self, job: ScanJob, state: PipelineState) {
    let (directive, rx) = watch::channel(Directive::Run);
    let scanner = Scanner {
      store: self.store.clone(),
      chain: Arc::clone(&self.chain),
      filters: Arc::clone(&self.filters),
      config: self.config.clone(),
      status: Arc::clone(&self.status),
      directive: rx,
      orphaned: false,
    };
    let handle = tokio::spawn(scanner.run(job));
    self.scan = Some(ScanTask { directive, handle });
    self.status.send_modify(|s| {
      s.state = state;
      s.last_error = None;
      s.updated_at = Utc::now();
    });
  }

  /// Ask the scanner to leave and wait for it.
  async fn halt(&mut self, directive: Directive) {
    let Some(task) = self.scan.take() else { return };
    task.directive.send_replace(directive);
    let outcome = task
      .handle
      .await
      .unwrap_or_else(|e| ScanOutcome::Failed(format!("scanner task failed: {e}")));
    if let ScanOutcome::Failed(reason) = outcome {
      self.status.send_modify(|s| s.last_error = Some(reason));
    }
  }

  fn on_scan_exit(&mut self, outcome: ScanOutcome) {
    match outcome {
      ScanOutcome::Replayed { autostart } => {
        self.set_state(PipelineState::Idle);
        if autostart {
          tracing::info!("starting forward scan after reclassification");
          self.begin(ScanJob::Forward, PipelineState::Running);
        }
      }
      ScanOutcome::Halted => self.set_state(PipelineState::Idle),
      ScanOutcome::Failed(reason) => {
        self.status.send_modify(|s| {
          s.state = PipelineState::Idle;
          s.last_error = Some(reason);
          s.updated_at = Utc::now();
        });
      }
    }
  }

  async fn shutdown(&mut self) {
    self.halt(Directive::Stop).await;
    if let Err(e) = self.store.flush().await {
      tracing::warn!(error = %e, "final flush failed");
    }
    self.set_state(PipelineState::Idle);
  }
}
