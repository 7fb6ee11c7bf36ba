//! Append-only, persisted queue of pending mutations.
//!
//! Every mutation issued while offline lands here and survives restarts.
//! The log keeps an in-memory mirror of the persisted list; the mirror is
//! only updated after persistence succeeds, so the two never diverge on
//! the happy path. A mutex serializes the read-modify-write of the
//! persisted list so concurrent enqueues cannot lose entries.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::store::KeyValueStore;

const LOG_KEY: &str = "action_log";
const DEAD_LETTER_KEY: &str = "action_log:dead";

/// The kind of mutation a pending action replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
  Create,
  Update,
  Delete,
  Cancel,
  Reactivate,
}

/// A queued mutation awaiting replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
  /// Unique, monotonically orderable by enqueue time.
  pub id: String,
  pub kind: ActionKind,
  pub entity_type: String,
  /// Absent for creates; the server has not assigned an id yet.
  pub entity_id: Option<i64>,
  pub payload: Option<serde_json::Value>,
  pub enqueued_at: DateTime<Utc>,
  /// Failed drain passes so far. Reaching the engine's limit moves the
  /// action to the dead-letter list.
  #[serde(default)]
  pub attempts: u32,
}

/// An action before the log assigns its id and timestamp.
#[derive(Debug, Clone)]
pub struct ActionDraft {
  pub kind: ActionKind,
  pub entity_type: String,
  pub entity_id: Option<i64>,
  pub payload: Option<serde_json::Value>,
}

/// Durable FIFO of pending actions.
pub struct ActionLog<S> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  /// Mirror of the persisted list; guards the read-modify-write cycle.
  actions: Mutex<Vec<PendingAction>>,
  dead: Mutex<Vec<PendingAction>>,
  /// Disambiguates ids enqueued within the same millisecond.
  seq: AtomicU64,
}

impl<S: KeyValueStore> ActionLog<S> {
  /// Load the log from storage, restoring any queue left by a previous
  /// session.
  pub fn load(storage: Arc<S>, clock: Arc<dyn Clock>) -> Result<Self> {
    let actions = Self::read_list(&storage, LOG_KEY)?;
    let dead = Self::read_list(&storage, DEAD_LETTER_KEY)?;
    Ok(Self {
      storage,
      clock,
      actions: Mutex::new(actions),
      dead: Mutex::new(dead),
      seq: AtomicU64::new(0),
    })
  }

  fn read_list(storage: &S, key: &str) -> Result<Vec<PendingAction>> {
    match storage.get_item(key)? {
      Some(raw) => {
        serde_json::from_str(&raw).map_err(|e| eyre!("Corrupt action log under {}: {}", key, e))
      }
      None => Ok(Vec::new()),
    }
  }

  fn persist(&self, key: &str, actions: &[PendingAction]) -> Result<()> {
    let raw =
      serde_json::to_string(actions).map_err(|e| eyre!("Failed to serialize action log: {}", e))?;
    self.storage.set_item(key, &raw)
  }

  fn next_id(&self) -> String {
    let millis = self.clock.now().timestamp_millis().max(0) as u64;
    let seq = self.seq.fetch_add(1, Ordering::SeqCst);
    format!("{:016x}-{:04x}", millis, seq & 0xffff)
  }

  /// Assign an id and timestamp, persist, and return the stored action.
  ///
  /// The in-memory mirror is untouched if persistence fails.
  pub fn enqueue(&self, draft: ActionDraft) -> Result<PendingAction> {
    let mut actions = self
      .actions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let action = PendingAction {
      id: self.next_id(),
      kind: draft.kind,
      entity_type: draft.entity_type,
      entity_id: draft.entity_id,
      payload: draft.payload,
      enqueued_at: self.clock.now(),
      attempts: 0,
    };

    let mut next = actions.clone();
    next.push(action.clone());
    self.persist(LOG_KEY, &next)?;
    *actions = next;

    Ok(action)
  }

  /// All pending actions, oldest first.
  pub fn list(&self) -> Vec<PendingAction> {
    self.actions.lock().map(|a| a.clone()).unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.actions.lock().map(|a| a.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Evict one entry. No-op if absent.
  pub fn remove(&self, id: &str) -> Result<()> {
    let mut actions = self
      .actions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let next: Vec<PendingAction> = actions.iter().filter(|a| a.id != id).cloned().collect();
    if next.len() == actions.len() {
      return Ok(());
    }

    self.persist(LOG_KEY, &next)?;
    *actions = next;
    Ok(())
  }

  /// Evict all entries.
  pub fn clear(&self) -> Result<()> {
    let mut actions = self
      .actions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    self.storage.remove_item(LOG_KEY)?;
    actions.clear();
    Ok(())
  }

  /// Persist an incremented failure count for one action.
  pub fn record_failure(&self, id: &str) -> Result<u32> {
    let mut actions = self
      .actions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut next = actions.clone();
    let attempts = match next.iter_mut().find(|a| a.id == id) {
      Some(action) => {
        action.attempts += 1;
        action.attempts
      }
      None => return Ok(0),
    };

    self.persist(LOG_KEY, &next)?;
    *actions = next;
    Ok(attempts)
  }

  /// Move an action to the dead-letter list, where the UI can surface it.
  pub fn bury(&self, id: &str) -> Result<()> {
    let mut actions = self
      .actions
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut dead = self.dead.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let action = match actions.iter().find(|a| a.id == id).cloned() {
      Some(action) => action,
      None => return Ok(()),
    };

    let next: Vec<PendingAction> = actions.iter().filter(|a| a.id != id).cloned().collect();
    let mut next_dead = dead.clone();
    next_dead.push(action);

    self.persist(LOG_KEY, &next)?;
    self.persist(DEAD_LETTER_KEY, &next_dead)?;
    *actions = next;
    *dead = next_dead;
    Ok(())
  }

  /// Actions evicted by the poison policy, oldest first.
  pub fn dead_letters(&self) -> Vec<PendingAction> {
    self.dead.lock().map(|d| d.clone()).unwrap_or_default()
  }
}
