//! Connectivity monitoring.
//!
//! Keeps a process-wide online/offline flag, refreshed by periodic probes,
//! and publishes transitions on a watch channel. The channel coalesces
//! flapping: subscribers only observe the latest state, and the sync
//! engine's single-flight guard handles the rest.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Latest known connectivity, plus when it was established.
#[derive(Debug, Clone, Copy)]
pub struct NetworkState {
  pub is_online: bool,
  pub last_checked: DateTime<Utc>,
}

type ProbeFn = Box<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Polls reachability and exposes an online/offline signal.
pub struct NetworkMonitor {
  probe: ProbeFn,
  tx: watch::Sender<bool>,
  last_checked: Mutex<DateTime<Utc>>,
  clock: Arc<dyn Clock>,
  probe_timeout: Duration,
  poll_interval: Duration,
}

impl NetworkMonitor {
  /// Build a monitor around an arbitrary probe. The monitor starts
  /// optimistically online; the first probe corrects it if needed.
  pub fn new<F>(probe: F, clock: Arc<dyn Clock>) -> Self
  where
    F: Fn() -> BoxFuture<'static, bool> + Send + Sync + 'static,
  {
    let (tx, _) = watch::channel(true);
    let last_checked = clock.now();
    Self {
      probe: Box::new(probe),
      tx,
      last_checked: Mutex::new(last_checked),
      clock,
      probe_timeout: DEFAULT_PROBE_TIMEOUT,
      poll_interval: DEFAULT_POLL_INTERVAL,
    }
  }

  /// Monitor probing a lightweight reachability endpoint over HTTP. Any
  /// response counts as reachable; errors and timeouts read as offline.
  pub fn http(url: &str, clock: Arc<dyn Clock>) -> Self {
    let client = reqwest::Client::new();
    let url = url.to_string();

    Self::new(
      move || {
        let client = client.clone();
        let url = url.clone();
        Box::pin(async move { client.head(&url).send().await.is_ok() })
      },
      clock,
    )
  }

  pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
    self.probe_timeout = timeout;
    self
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  /// Latest known state, without probing.
  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  pub fn state(&self) -> NetworkState {
    NetworkState {
      is_online: self.is_online(),
      last_checked: *self.last_checked.lock().unwrap(),
    }
  }

  /// Actively probe now. Resolves `false` on timeout or any probe error,
  /// never rejects, and never blocks past the probe timeout.
  pub async fn check_now(&self) -> bool {
    let online = tokio::time::timeout(self.probe_timeout, (self.probe)())
      .await
      .unwrap_or(false);

    *self.last_checked.lock().unwrap() = self.clock.now();

    let changed = self.tx.send_if_modified(|state| {
      if *state != online {
        *state = online;
        true
      } else {
        false
      }
    });
    if changed {
      if online {
        info!("network is back online");
      } else {
        info!("network went offline");
      }
    } else {
      debug!(online, "connectivity probe");
    }

    online
  }

  /// Receiver of the raw online flag; transitions are coalesced.
  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Invoke `listener` on every transition.
  pub fn on_change<F>(&self, listener: F) -> JoinHandle<()>
  where
    F: Fn(bool) + Send + 'static,
  {
    let mut rx = self.subscribe();
    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        listener(*rx.borrow());
      }
    })
  }

  /// Probe on an interval until the handle is dropped or aborted.
  pub fn spawn_polling(self: Arc<Self>) -> JoinHandle<()> {
    let monitor = self;
    tokio::spawn(async move {
      loop {
        tokio::time::sleep(monitor.poll_interval).await;
        monitor.check_now().await;
      }
    })
  }
}
