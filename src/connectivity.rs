//! Network reachability as a small observable state machine.
//!
//! A [`ConnectivityMonitor`] samples a [`ReachabilityProbe`] and publishes the
//! debounced result on a `watch` channel. Consumers hold a clone of the
//! monitor and either read [`ConnectivityMonitor::current_state`] or
//! subscribe to transitions.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConnectivityConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
  Offline,
  /// Reachable but slow, or the platform could not tell
  Degraded,
  Online,
}

impl fmt::Display for ConnectivityState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Offline => write!(f, "offline"),
      Self::Degraded => write!(f, "degraded"),
      Self::Online => write!(f, "online"),
    }
  }
}

/// The platform's reachability signal.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
  /// Sample the current state. `None` means the platform cannot report.
  async fn sample(&self) -> Option<ConnectivityState>;
}

/// Suppresses flapping: a new raw state must hold for `dwell` before it is
/// reported.
#[derive(Debug, Clone)]
pub struct Debouncer {
  dwell: Duration,
  reported: ConnectivityState,
  candidate: Option<(ConnectivityState, Instant)>,
}

impl Debouncer {
  pub fn new(initial: ConnectivityState, dwell: Duration) -> Self {
    Self {
      dwell,
      reported: initial,
      candidate: None,
    }
  }

  pub fn reported(&self) -> ConnectivityState {
    self.reported
  }

  /// Feed one raw sample; returns the new state when a transition is due.
  pub fn observe(&mut self, raw: ConnectivityState, at: Instant) -> Option<ConnectivityState> {
    if raw == self.reported {
      self.candidate = None;
      return None;
    }

    let since = match self.candidate {
      Some((state, since)) if state == raw => since,
      _ => {
        self.candidate = Some((raw, at));
        at
      }
    };

    if at.saturating_duration_since(since) >= self.dwell {
      self.reported = raw;
      self.candidate = None;
      Some(raw)
    } else {
      None
    }
  }
}

/// Process-wide connectivity state. Clones observe the same channel.
#[derive(Clone)]
pub struct ConnectivityMonitor {
  rx: watch::Receiver<ConnectivityState>,
  shutdown: CancellationToken,
  /// Sender of a fixed monitor, held so subscribers never see a closed channel
  fixed: Option<Arc<watch::Sender<ConnectivityState>>>,
}

impl ConnectivityMonitor {
  /// Take an initial sample, then keep sampling `probe` in the background.
  pub async fn spawn(probe: Arc<dyn ReachabilityProbe>, config: &ConnectivityConfig) -> Self {
    let initial = probe.sample().await.unwrap_or(ConnectivityState::Degraded);
    let (tx, rx) = watch::channel(initial);
    let shutdown = CancellationToken::new();

    info!(state = %initial, "connectivity monitor started");

    let token = shutdown.clone();
    let dwell = config.dwell();
    let interval = config.sample_interval();
    tokio::spawn(async move {
      let mut debouncer = Debouncer::new(initial, dwell);
      loop {
        tokio::select! {
          _ = token.cancelled() => break,
          _ = tx.closed() => break,
          _ = tokio::time::sleep(interval) => {}
        }

        let raw = probe.sample().await.unwrap_or(ConnectivityState::Degraded);
        if let Some(state) = debouncer.observe(raw, Instant::now()) {
          info!(%state, "connectivity changed");
          tx.send_replace(state);
        } else if raw != debouncer.reported() {
          debug!(%raw, "connectivity sample pending dwell");
        }
      }
      debug!("connectivity monitor stopped");
    });

    Self {
      rx,
      shutdown,
      fixed: None,
    }
  }

  /// A monitor driven by hand, for embedders that get transitions pushed to
  /// them and for tests.
  pub fn manual(initial: ConnectivityState) -> (Self, ManualConnectivity) {
    let (tx, rx) = watch::channel(initial);
    (
      Self {
        rx,
        shutdown: CancellationToken::new(),
        fixed: None,
      },
      ManualConnectivity { tx },
    )
  }

  /// A monitor that reports `state` forever, for setups with nothing to
  /// sample.
  pub fn fixed(state: ConnectivityState) -> Self {
    let (tx, rx) = watch::channel(state);
    Self {
      rx,
      shutdown: CancellationToken::new(),
      fixed: Some(Arc::new(tx)),
    }
  }

  pub fn current_state(&self) -> ConnectivityState {
    *self.rx.borrow()
  }

  /// A receiver positioned at the current state; `changed()` fires on the
  /// next transition.
  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    let mut rx = self.rx.clone();
    rx.borrow_and_update();
    rx
  }

  /// Invoke `callback` once for every reported transition until shutdown.
  pub fn on_transition<F>(&self, mut callback: F) -> JoinHandle<()>
  where
    F: FnMut(ConnectivityState) + Send + 'static,
  {
    let mut rx = self.subscribe();
    let token = self.shutdown.clone();
    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = token.cancelled() => break,
          changed = rx.changed() => {
            if changed.is_err() {
              break;
            }
            let state = *rx.borrow_and_update();
            callback(state);
          }
        }
      }
    })
  }

  /// Stop the sampling task and any transition callbacks.
  pub fn shutdown(&self) {
    self.shutdown.cancel();
  }
}

/// Sender half of [`ConnectivityMonitor::manual`].
#[derive(Clone)]
pub struct ManualConnectivity {
  tx: watch::Sender<ConnectivityState>,
}

impl ManualConnectivity {
  /// Publish `state`; subscribers are only notified when it differs.
  pub fn set(&self, state: ConnectivityState) {
    self.tx.send_if_modified(|current| {
      if *current == state {
        false
      } else {
        *current = state;
        true
      }
    });
  }
}

/// Probes reachability with a HEAD request against the remote store.
pub struct HttpProbe {
  client: reqwest::Client,
  url: url::Url,
  degraded_latency: Duration,
}

impl HttpProbe {
  pub fn new(url: url::Url, timeout: Duration, degraded_latency: Duration) -> reqwest::Result<Self> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self {
      client,
      url,
      degraded_latency,
    })
  }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
  async fn sample(&self) -> Option<ConnectivityState> {
    let started = Instant::now();
    match self.client.head(self.url.clone()).send().await {
      // Any HTTP answer proves the network path works.
      Ok(_) if started.elapsed() > self.degraded_latency => Some(ConnectivityState::Degraded),
      Ok(_) => Some(ConnectivityState::Online),
      Err(e) if e.is_timeout() => Some(ConnectivityState::Degraded),
      Err(e) if e.is_connect() => Some(ConnectivityState::Offline),
      Err(e) => {
        debug!(error = %e, "reachability probe failed");
        None
      }
    }
  }
}
