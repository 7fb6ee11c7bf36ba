//! In-memory key-value store for tests and ephemeral sessions.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::KeyValueStore;

/// Volatile store backed by a `HashMap`. Contents do not survive restarts.
#[derive(Default)]
pub struct MemoryStore {
  items: Mutex<HashMap<String, String>>,
  /// When set, every write fails. Lets tests exercise persistence failures.
  fail_writes: Mutex<bool>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make subsequent writes fail (or succeed again).
  pub fn set_fail_writes(&self, fail: bool) {
    *self.fail_writes.lock().unwrap() = fail;
  }

  fn check_writable(&self) -> Result<()> {
    if *self.fail_writes.lock().unwrap() {
      return Err(eyre!("Simulated storage write failure"));
    }
    Ok(())
  }
}

impl KeyValueStore for MemoryStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    Ok(self.items.lock().unwrap().get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    self.check_writable()?;
    self
      .items
      .lock()
      .unwrap()
      .insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    self.check_writable()?;
    self.items.lock().unwrap().remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.items.lock().unwrap().keys().cloned().collect())
  }
}
