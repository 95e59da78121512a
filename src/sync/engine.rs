//! Push/pull orchestration with single-flight cycles and backoff.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::remote::{PushItem, PushOutcome, RemoteStore};
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityState};
use crate::error::{NetworkError, SyncError};
use crate::store::{ConflictDiscarded, LocalStore, MutationLogEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
  Idle,
  Pushing,
  Pulling,
  Backoff,
}

/// What the UI observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
  pub phase: SyncPhase,
  /// Set after `max_attempts` consecutive failed attempts, cleared by the next success
  pub degraded: bool,
  pub consecutive_failures: u32,
  /// Journal entries waiting to be pushed
  pub pending: u64,
  pub last_synced_at: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
  fn default() -> Self {
    Self {
      phase: SyncPhase::Idle,
      degraded: false,
      consecutive_failures: 0,
      pending: 0,
      last_synced_at: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  Timer,
  ConnectivityRestored,
  Requested,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
  pub pushed: usize,
  pub batches: usize,
  pub pulled: usize,
  pub deferred: usize,
  pub conflicts: usize,
}

/// Informational events for the UI.
#[derive(Debug, Clone)]
pub enum SyncEvent {
  ConflictDiscarded(ConflictDiscarded),
  CycleCompleted(CycleReport),
  CycleFailed { attempt: u32, error: String },
}

struct Inner {
  store: LocalStore,
  remote: Arc<dyn RemoteStore>,
  connectivity: ConnectivityMonitor,
  config: SyncConfig,
  backoff: Backoff,
  entity_types: Vec<String>,
  network_timeout: Duration,

  status: watch::Sender<SyncStatus>,
  events: broadcast::Sender<SyncEvent>,

  /// Held for the whole of a cycle
  running: tokio::sync::Mutex<()>,
  /// A trigger arrived while a cycle was running
  rerun: AtomicBool,
  current: Mutex<CancellationToken>,
  requests: Notify,
  shutdown: CancellationToken,
  consecutive_failures: AtomicU32,
}

/// Drains the mutation journal to the remote and merges remote changes back.
#[derive(Clone)]
pub struct SyncEngine {
  inner: Arc<Inner>,
}

/// Collects the engine's collaborators and settings.
pub struct SyncEngineBuilder {
  store: LocalStore,
  remote: Arc<dyn RemoteStore>,
  connectivity: ConnectivityMonitor,
  config: SyncConfig,
  entity_types: Vec<String>,
  network_timeout: Duration,
}

impl SyncEngineBuilder {
  pub fn config(mut self, config: SyncConfig) -> Self {
    self.config = config;
    self
  }

  /// Entity types pulled every cycle, in addition to those already cached.
  pub fn entity_types(mut self, entity_types: Vec<String>) -> Self {
    self.entity_types = entity_types;
    self
  }

  /// Timeout applied to every remote call.
  pub fn network_timeout(mut self, timeout: Duration) -> Self {
    self.network_timeout = timeout;
    self
  }

  pub fn build(self) -> SyncEngine {
    let pending = self.store.pending_count().unwrap_or(0);
    let (status, _) = watch::channel(SyncStatus {
      pending,
      ..SyncStatus::default()
    });
    let (events, _) = broadcast::channel(64);
    let shutdown = CancellationToken::new();

    SyncEngine {
      inner: Arc::new(Inner {
        backoff: Backoff::new(self.config.backoff_base(), self.config.backoff_cap()),
        store: self.store,
        remote: self.remote,
        connectivity: self.connectivity,
        config: self.config,
        entity_types: self.entity_types,
        network_timeout: self.network_timeout,
        status,
        events,
        running: tokio::sync::Mutex::new(()),
        rerun: AtomicBool::new(false),
        current: Mutex::new(shutdown.child_token()),
        requests: Notify::new(),
        shutdown,
        consecutive_failures: AtomicU32::new(0),
      }),
    }
  }
}

impl SyncEngine {
  pub fn builder(
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivityMonitor,
  ) -> SyncEngineBuilder {
    SyncEngineBuilder {
      store,
      remote,
      connectivity,
      config: SyncConfig::default(),
      entity_types: Vec::new(),
      network_timeout: Duration::from_secs(30),
    }
  }

  pub fn status(&self) -> watch::Receiver<SyncStatus> {
    self.inner.status.subscribe()
  }

  pub fn current_status(&self) -> SyncStatus {
    self.inner.status.borrow().clone()
  }

  pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
    self.inner.events.subscribe()
  }

  /// Ask the background loop for a cycle (pull-to-refresh).
  pub fn request_sync(&self) {
    self.inner.requests.notify_one();
  }

  /// Cooperatively cancel the running cycle at its next batch boundary.
  pub fn cancel_current(&self) {
    if let Ok(token) = self.inner.current.lock() {
      token.cancel();
    }
  }

  pub fn shutdown(&self) {
    self.inner.shutdown.cancel();
  }

  /// Start the background loop.
  pub fn spawn(&self) -> JoinHandle<()> {
    let engine = self.clone();
    tokio::spawn(async move { engine.run().await })
  }

  async fn run(&self) {
    let mut connectivity = self.inner.connectivity.subscribe();
    let mut journal = self.inner.store.journal_changes();
    let mut watching_connectivity = true;
    let mut watching_journal = true;
    let mut ticker = tokio::time::interval(self.inner.config.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval = ?self.inner.config.interval(), "sync engine started");

    loop {
      let trigger = tokio::select! {
        _ = self.inner.shutdown.cancelled() => break,
        _ = ticker.tick() => Trigger::Timer,
        _ = self.inner.requests.notified() => Trigger::Requested,
        changed = connectivity.changed(), if watching_connectivity => {
          if changed.is_err() {
            // Fixed state from here on; timer and requests still drive cycles.
            debug!("connectivity monitor closed");
            watching_connectivity = false;
            continue;
          }
          match *connectivity.borrow_and_update() {
            ConnectivityState::Online => Trigger::ConnectivityRestored,
            _ => continue,
          }
        }
        changed = journal.changed(), if watching_journal => {
          match changed {
            Ok(()) => {
              journal.borrow_and_update();
              self.refresh_pending();
            }
            Err(_) => watching_journal = false,
          }
          continue;
        }
      };

      match self.sync_now(trigger).await {
        Ok(Some(report)) => debug!(?trigger, ?report, "sync cycle finished"),
        Ok(None) => debug!(?trigger, "sync cycle skipped"),
        Err(SyncError::Storage(e)) if e.is_corrupt() => {
          error!(error = %e, "local cache is corrupt, a reset is required");
        }
        Err(e) => debug!(?trigger, error = %e, "sync cycle ended without success"),
      }
    }

    info!("sync engine stopped");
  }

  /// Run one cycle now, with retries, unless connectivity rules it out.
  ///
  /// Returns `Ok(None)` when the cycle was skipped or coalesced into one that
  /// is already running; that cycle runs once more when it finishes.
  pub async fn sync_now(&self, trigger: Trigger) -> Result<Option<CycleReport>, SyncError> {
    self.refresh_pending();
    let _guard = match self.inner.running.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!(?trigger, "sync already running, coalescing");
        self.inner.rerun.store(true, Ordering::SeqCst);
        return Ok(None);
      }
    };

    let mut last = None;
    loop {
      self.inner.rerun.store(false, Ordering::SeqCst);

      let state = self.inner.connectivity.current_state();
      if !should_run(trigger, state) {
        debug!(?trigger, %state, "connectivity does not allow a sync cycle");
        return Ok(last);
      }

      last = Some(self.run_with_retry(state).await?);

      if !self.inner.rerun.swap(false, Ordering::SeqCst) {
        return Ok(last);
      }
      debug!("running coalesced sync cycle");
    }
  }

  async fn run_with_retry(&self, state: ConnectivityState) -> Result<CycleReport, SyncError> {
    let max_attempts = self.inner.config.max_attempts.max(1);
    let batch_size = batch_size_for(self.inner.config.max_batch_size, state);
    let mut attempt = 0;

    loop {
      if self.inner.connectivity.current_state() == ConnectivityState::Offline {
        self.set_phase(SyncPhase::Idle);
        return Err(SyncError::Offline);
      }

      let token = self.inner.shutdown.child_token();
      if let Ok(mut current) = self.inner.current.lock() {
        *current = token.clone();
      }

      match self.run_cycle(&token, batch_size).await {
        Ok(report) => {
          self.inner.consecutive_failures.store(0, Ordering::SeqCst);
          let now = self.inner.store.now();
          self.update_status(|s| {
            s.phase = SyncPhase::Idle;
            s.degraded = false;
            s.consecutive_failures = 0;
            s.last_synced_at = Some(now);
          });
          info!(
            pushed = report.pushed,
            pulled = report.pulled,
            deferred = report.deferred,
            conflicts = report.conflicts,
            "sync cycle completed"
          );
          self.compact();
          let _ = self.inner.events.send(SyncEvent::CycleCompleted(report.clone()));
          return Ok(report);
        }
        Err(e) if !e.is_retryable() => {
          self.set_phase(SyncPhase::Idle);
          debug!(error = %e, "sync cycle stopped");
          return Err(e);
        }
        Err(e) => {
          attempt += 1;
          let failures = self.inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
          let degraded = failures >= max_attempts;
          self.update_status(|s| {
            s.consecutive_failures = failures;
            s.degraded = degraded;
          });
          self.refresh_pending();
          let _ = self.inner.events.send(SyncEvent::CycleFailed {
            attempt,
            error: e.to_string(),
          });

          if attempt >= max_attempts {
            warn!(attempt, error = %e, "sync attempts exhausted, reporting degraded");
            self.set_phase(SyncPhase::Idle);
            return Err(e);
          }

          let delay = self.inner.backoff.delay_with_jitter(attempt - 1);
          warn!(attempt, ?delay, error = %e, "sync cycle failed, backing off");
          self.set_phase(SyncPhase::Backoff);

          tokio::select! {
            _ = token.cancelled() => {
              self.set_phase(SyncPhase::Idle);
              return Err(SyncError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
          }
          self.set_phase(SyncPhase::Idle);
        }
      }
    }
  }

  /// One push phase followed, if it succeeded, by one pull phase.
  async fn run_cycle(
    &self,
    token: &CancellationToken,
    batch_size: usize,
  ) -> Result<CycleReport, SyncError> {
    let mut report = CycleReport::default();
    self.refresh_pending();

    self.set_phase(SyncPhase::Pushing);
    loop {
      self.check_continue(token)?;

      let pending = self.inner.store.pending_mutations(batch_size)?;
      let batch = leading_batch(&pending);
      let Some(first) = batch.first() else {
        break;
      };
      let entity_type = first.entity_type.as_str();

      let items: Vec<PushItem> = batch.iter().map(PushItem::from).collect();
      debug!(
        entity_type,
        first_seq = first.sequence_id,
        len = items.len(),
        "pushing batch"
      );

      let outcome = self
        .with_timeout(self.inner.remote.push_batch(entity_type, &items))
        .await?;
      if let PushOutcome::Partial { failed } = outcome {
        return Err(NetworkError::Rejected { failed }.into());
      }

      let sequence_ids: Vec<i64> = batch.iter().map(|e| e.sequence_id).collect();
      self.inner.store.mark_synced(&sequence_ids)?;
      report.pushed += batch.len();
      report.batches += 1;
      self.refresh_pending();
    }

    self.set_phase(SyncPhase::Pulling);
    for entity_type in self.entity_types()? {
      self.check_continue(token)?;

      let since = self
        .inner
        .store
        .checkpoint(&entity_type)?
        .map(|c| c.last_pulled_at);
      let records = self
        .with_timeout(self.inner.remote.pull_since(&entity_type, since))
        .await?;

      let applied = self
        .inner
        .store
        .apply_remote_batch(&entity_type, &records, None)?;
      report.pulled += applied.applied + applied.deleted;
      report.deferred += applied.deferred.len();
      report.conflicts += applied.conflicts.len();

      for conflict in applied.conflicts {
        let _ = self.inner.events.send(SyncEvent::ConflictDiscarded(conflict));
      }
    }

    self.refresh_pending();
    Ok(report)
  }

  /// Batch boundary: stop on cancellation or when connectivity dropped.
  fn check_continue(&self, token: &CancellationToken) -> Result<(), SyncError> {
    if token.is_cancelled() {
      return Err(SyncError::Cancelled);
    }
    if self.inner.connectivity.current_state() == ConnectivityState::Offline {
      return Err(SyncError::Offline);
    }
    Ok(())
  }

  async fn with_timeout<T>(
    &self,
    call: impl Future<Output = Result<T, NetworkError>>,
  ) -> Result<T, NetworkError> {
    match tokio::time::timeout(self.inner.network_timeout, call).await {
      Ok(result) => result,
      Err(_) => Err(NetworkError::Timeout(self.inner.network_timeout)),
    }
  }

  fn entity_types(&self) -> Result<Vec<String>, SyncError> {
    let mut types = self.inner.entity_types.clone();
    for known in self.inner.store.entity_types()? {
      if !types.contains(&known) {
        types.push(known);
      }
    }
    Ok(types)
  }

  fn compact(&self) {
    let cutoff = self.inner.store.now() - self.inner.config.journal_retention();
    if let Err(e) = self.inner.store.compact_journal(cutoff) {
      warn!(error = %e, "journal compaction failed");
    }
  }

  fn refresh_pending(&self) {
    match self.inner.store.pending_count() {
      Ok(pending) => self.update_status(|s| s.pending = pending),
      Err(e) => debug!(error = %e, "could not count pending mutations"),
    }
  }

  fn set_phase(&self, phase: SyncPhase) {
    self.update_status(|s| s.phase = phase);
  }

  fn update_status(&self, f: impl FnOnce(&mut SyncStatus)) {
    self.inner.status.send_if_modified(|status| {
      let before = status.clone();
      f(status);
      *status != before
    });
  }
}

/// Timer cycles need full connectivity; explicit and reconnect triggers also
/// run on a degraded link. Nothing runs offline.
fn should_run(trigger: Trigger, state: ConnectivityState) -> bool {
  match state {
    ConnectivityState::Offline => false,
    ConnectivityState::Degraded => trigger != Trigger::Timer,
    ConnectivityState::Online => true,
  }
}

fn batch_size_for(max_batch_size: usize, state: ConnectivityState) -> usize {
  let size = max_batch_size.max(1);
  match state {
    ConnectivityState::Degraded => (size / 4).max(1),
    _ => size,
  }
}

/// The leading run of same-type entries: one `push_batch` call.
fn leading_batch(pending: &[MutationLogEntry]) -> &[MutationLogEntry] {
  let Some(first) = pending.first() else {
    return pending;
  };
  let len = pending
    .iter()
    .take_while(|e| e.entity_type == first.entity_type)
    .count();
  &pending[..len]
}
