//! Sync engine: drains the action log against the remote API.
//!
//! The engine is always `Idle` or `Draining`, with an atomic single-flight
//! guard so re-entrant triggers (connectivity flapping, a manual "sync
//! now" mid-drain) never run two drains concurrently. Each queued action
//! is independent: a failure is recorded and left queued without aborting
//! the rest of the pass.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::types::NewSubscription;
use crate::api::{ApiError, ApiResult, SubscriptionApi};
use crate::cache::AggregateCache;
use crate::clock::Clock;
use crate::store::KeyValueStore;

use super::action_log::{ActionKind, ActionLog, PendingAction};
use super::overlay::OverlayStore;

/// Failed drain passes before an action is moved to the dead-letter list.
const DEFAULT_MAX_DRAIN_PASSES: u32 = 5;

/// Cache prefixes whose underlying resources a drained mutation can
/// affect.
const INVALIDATED_PREFIXES: &[&str] = &["dashboard:", "subscriptions"];

/// Replays one pending action against the remote API.
///
/// The engine depends only on this seam, so tests drive drains without a
/// network.
pub trait Dispatcher: Send + Sync {
  fn dispatch(&self, action: &PendingAction) -> BoxFuture<'static, ApiResult<()>>;
}

/// Production dispatcher mapping action kinds onto the API client.
pub struct ApiDispatcher {
  api: Arc<dyn SubscriptionApi>,
}

impl ApiDispatcher {
  pub fn new(api: Arc<dyn SubscriptionApi>) -> Self {
    Self { api }
  }
}

impl Dispatcher for ApiDispatcher {
  fn dispatch(&self, action: &PendingAction) -> BoxFuture<'static, ApiResult<()>> {
    let api = Arc::clone(&self.api);
    let action = action.clone();

    Box::pin(async move {
      let entity_id = || {
        action
          .entity_id
          .ok_or_else(|| ApiError::Decode(format!("queued {:?} action without entity id", action.kind)))
      };

      match action.kind {
        ActionKind::Create => {
          let draft: NewSubscription = action
            .payload
            .clone()
            .ok_or_else(|| ApiError::Decode("queued create without payload".to_string()))
            .and_then(|p| {
              serde_json::from_value(p).map_err(|e| ApiError::Decode(e.to_string()))
            })?;
          api.create_subscription(draft).await.map(|_| ())
        }
        ActionKind::Update => {
          let fields = match action.payload.clone() {
            Some(serde_json::Value::Object(map)) => map,
            _ => return Err(ApiError::Decode("queued update without field map".to_string())),
          };
          api.update_subscription(entity_id()?, fields).await.map(|_| ())
        }
        ActionKind::Delete => api.delete_subscription(entity_id()?).await,
        ActionKind::Cancel => api.cancel_subscription(entity_id()?).await.map(|_| ()),
        ActionKind::Reactivate => api.reactivate_subscription(entity_id()?).await.map(|_| ()),
      }
    })
  }
}

/// What a `sync_now` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
  /// False when another drain was already in flight and this trigger
  /// no-opped.
  pub ran: bool,
  pub succeeded: usize,
  pub failed: usize,
  pub buried: usize,
}

type RefreshFn = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Drains queued actions in enqueue order once connectivity returns.
pub struct SyncEngine<S> {
  log: Arc<ActionLog<S>>,
  overlay: Arc<OverlayStore>,
  dispatcher: Arc<dyn Dispatcher>,
  cache: Arc<AggregateCache<S>>,
  clock: Arc<dyn Clock>,
  is_syncing: AtomicBool,
  last_sync: Mutex<Option<DateTime<Utc>>>,
  max_drain_passes: u32,
  refresh: Option<RefreshFn>,
}

impl<S: KeyValueStore + 'static> SyncEngine<S> {
  pub fn new(
    log: Arc<ActionLog<S>>,
    overlay: Arc<OverlayStore>,
    dispatcher: Arc<dyn Dispatcher>,
    cache: Arc<AggregateCache<S>>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      log,
      overlay,
      dispatcher,
      cache,
      clock,
      is_syncing: AtomicBool::new(false),
      last_sync: Mutex::new(None),
      max_drain_passes: DEFAULT_MAX_DRAIN_PASSES,
      refresh: None,
    }
  }

  pub fn with_max_drain_passes(mut self, passes: u32) -> Self {
    self.max_drain_passes = passes;
    self
  }

  /// Foreground refresh triggered once after a pass that applied
  /// anything.
  pub fn with_refresh(mut self, refresh: RefreshFn) -> Self {
    self.refresh = Some(refresh);
    self
  }

  pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
    *self.last_sync.lock().unwrap()
  }

  pub fn is_syncing(&self) -> bool {
    self.is_syncing.load(Ordering::SeqCst)
  }

  /// Drain all queued actions. Re-entrant calls while a drain is in
  /// flight no-op with `ran: false`.
  pub async fn sync_now(&self) -> Result<DrainOutcome> {
    if self
      .is_syncing
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("drain already in flight, ignoring trigger");
      return Ok(DrainOutcome::default());
    }

    let result = self.drain().await;
    self.is_syncing.store(false, Ordering::SeqCst);
    result
  }

  async fn drain(&self) -> Result<DrainOutcome> {
    let snapshot = self.log.list();
    let mut outcome = DrainOutcome {
      ran: true,
      ..Default::default()
    };

    if !snapshot.is_empty() {
      info!(pending = snapshot.len(), "draining action log");
    }

    for batch in coalesce(snapshot) {
      match self.dispatcher.dispatch(&batch.action).await {
        Ok(()) => {
          if let Some(id) = batch.action.entity_id {
            self.overlay.remove_pending_change(id);
          }
          for member_id in &batch.member_ids {
            self.log.remove(member_id)?;
          }
          outcome.succeeded += 1;
        }
        Err(e) => {
          warn!(
            action = %batch.action.id,
            kind = ?batch.action.kind,
            error = %e,
            "queued action failed, keeping it for the next pass"
          );
          outcome.failed += 1;

          for member_id in &batch.member_ids {
            let attempts = self.log.record_failure(member_id)?;
            if attempts >= self.max_drain_passes {
              warn!(action = %member_id, attempts, "giving up on poison action");
              self.log.bury(member_id)?;
              outcome.buried += 1;
            }
          }
        }
      }
    }

    // Invalidation strictly after the actions that made it necessary.
    if outcome.succeeded > 0 {
      for &prefix in INVALIDATED_PREFIXES {
        if let Err(e) = self.cache.invalidate_all(prefix) {
          warn!(prefix, error = %e, "cache invalidation failed");
        }
      }
      if let Some(refresh) = &self.refresh {
        refresh().await;
      }
    }

    *self.last_sync.lock().unwrap() = Some(self.clock.now());
    Ok(outcome)
  }

  /// Watch connectivity and drain on every offline -> online transition.
  /// The watch channel coalesces flapping; the single-flight guard covers
  /// the rest.
  pub fn spawn_on_reconnect(self: Arc<Self>, mut rx: watch::Receiver<bool>) -> JoinHandle<()> {
    let engine = self;
    tokio::spawn(async move {
      let mut was_online = *rx.borrow();
      while rx.changed().await.is_ok() {
        let is_online = *rx.borrow();
        if is_online && !was_online {
          info!("connectivity restored, syncing queued changes");
          if let Err(e) = engine.sync_now().await {
            warn!(error = %e, "reconnect drain failed");
          }
        }
        was_online = is_online;
      }
    })
  }
}

/// A dispatch unit: one action, possibly standing in for several
/// coalesced log entries.
struct Batch {
  action: PendingAction,
  member_ids: Vec<String>,
}

/// Collapse contiguous runs of updates to the same entity into a single
/// call carrying the field-merged payload. Contiguity keeps per-entity
/// enqueue order intact; anything else dispatches as-is.
fn coalesce(actions: Vec<PendingAction>) -> Vec<Batch> {
  let mut batches: Vec<Batch> = Vec::new();

  for action in actions {
    if action.kind == ActionKind::Update {
      if let Some(last) = batches.last_mut() {
        if last.action.kind == ActionKind::Update
          && last.action.entity_type == action.entity_type
          && last.action.entity_id == action.entity_id
        {
          merge_payload(&mut last.action.payload, action.payload);
          last.action.attempts = last.action.attempts.max(action.attempts);
          last.member_ids.push(action.id);
          continue;
        }
      }
    }

    batches.push(Batch {
      member_ids: vec![action.id.clone()],
      action,
    });
  }

  batches
}

/// Shallow field merge, later wins per field.
fn merge_payload(base: &mut Option<serde_json::Value>, patch: Option<serde_json::Value>) {
  match (base.as_mut(), patch) {
    (Some(serde_json::Value::Object(base_map)), Some(serde_json::Value::Object(patch_map))) => {
      for (field, value) in patch_map {
        base_map.insert(field, value);
      }
    }
    (_, Some(patch)) => *base = Some(patch),
    (_, None) => {}
  }
}
