//! Optimistic overlay store.
//!
//! Maps entity ids to the unconfirmed field changes a user has issued, so
//! reads reflect a mutation immediately while the server copy still shows
//! the old values. At most one overlay exists per entity; a new mutation
//! merges into it, later calls winning per field. Application is a pure
//! merge: list reads re-derive the view per item on every read, so
//! removing an overlay is immediately visible.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::api::types::Fields;

/// Entities that can carry an overlay.
pub trait Identified {
  fn entity_id(&self) -> i64;
}

/// In-memory map of pending field-level changes.
#[derive(Default)]
pub struct OverlayStore {
  overlays: Mutex<HashMap<i64, Fields>>,
}

impl OverlayStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Merge `changes` into the overlay for `id` (shallow, later wins per
  /// field).
  pub fn add_pending_change(&self, id: i64, changes: Fields) {
    let mut overlays = self.overlays.lock().unwrap();
    let overlay = overlays.entry(id).or_default();
    for (field, value) in changes {
      overlay.insert(field, value);
    }
  }

  /// Drop the overlay for `id`, confirming or rolling back the change.
  pub fn remove_pending_change(&self, id: i64) {
    self.overlays.lock().unwrap().remove(&id);
  }

  pub fn get(&self, id: i64) -> Option<Fields> {
    self.overlays.lock().unwrap().get(&id).cloned()
  }

  pub fn pending_count(&self) -> usize {
    self.overlays.lock().unwrap().len()
  }

  pub fn ids(&self) -> Vec<i64> {
    self.overlays.lock().unwrap().keys().copied().collect()
  }

  pub fn clear(&self) {
    self.overlays.lock().unwrap().clear();
  }

  /// Return `entity` with its overlay applied, or unchanged if none
  /// exists. Pure and idempotent; the stored overlay is not consumed.
  pub fn optimistic_view<T>(&self, entity: &T) -> T
  where
    T: Identified + Serialize + DeserializeOwned + Clone,
  {
    let overlay = match self.get(entity.entity_id()) {
      Some(overlay) => overlay,
      None => return entity.clone(),
    };

    let mut value = match serde_json::to_value(entity) {
      Ok(serde_json::Value::Object(map)) => map,
      _ => return entity.clone(),
    };
    for (field, patch) in overlay {
      value.insert(field, patch);
    }

    match serde_json::from_value(serde_json::Value::Object(value)) {
      Ok(merged) => merged,
      Err(e) => {
        // An overlay field no longer fits the entity shape; serve the
        // server copy rather than a half-applied merge.
        debug!(id = entity.entity_id(), error = %e, "overlay did not apply");
        entity.clone()
      }
    }
  }

  /// Re-derive the optimistic view for every item of a list read.
  pub fn optimistic_views<T>(&self, entities: &[T]) -> Vec<T>
  where
    T: Identified + Serialize + DeserializeOwned + Clone,
  {
    entities.iter().map(|e| self.optimistic_view(e)).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Row {
    id: i64,
    name: String,
    cost: f64,
  }

  impl Identified for Row {
    fn entity_id(&self) -> i64 {
      self.id
    }
  }

  fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
    pairs
      .iter()
      .map(|(k, v)| ((*k).to_string(), v.clone()))
      .collect()
  }

  fn row() -> Row {
    Row {
      id: 42,
      name: "Netflix".to_string(),
      cost: 15.99,
    }
  }

  #[test]
  fn test_merge_not_replace() {
    let store = OverlayStore::new();

    store.add_pending_change(7, fields(&[("a", serde_json::json!(1))]));
    store.add_pending_change(7, fields(&[("b", serde_json::json!(2))]));

    let overlay = store.get(7).unwrap();
    assert_eq!(overlay["a"], serde_json::json!(1));
    assert_eq!(overlay["b"], serde_json::json!(2));
    assert_eq!(store.pending_count(), 1);
  }

  #[test]
  fn test_later_call_wins_per_field() {
    let store = OverlayStore::new();

    store.add_pending_change(7, fields(&[("name", serde_json::json!("A"))]));
    store.add_pending_change(7, fields(&[("name", serde_json::json!("B"))]));

    assert_eq!(store.get(7).unwrap()["name"], serde_json::json!("B"));
  }

  #[test]
  fn test_view_applies_overlay_fields() {
    let store = OverlayStore::new();
    store.add_pending_change(42, fields(&[("cost", serde_json::json!(9.99))]));

    let view = store.optimistic_view(&row());
    assert_eq!(view.cost, 9.99);
    assert_eq!(view.name, "Netflix");
  }

  #[test]
  fn test_view_is_identity_without_overlay() {
    let store = OverlayStore::new();
    assert_eq!(store.optimistic_view(&row()), row());
  }

  #[test]
  fn test_view_is_idempotent() {
    let store = OverlayStore::new();
    store.add_pending_change(42, fields(&[("name", serde_json::json!("Spotify"))]));

    let once = store.optimistic_view(&row());
    let twice = store.optimistic_view(&once);
    assert_eq!(once, twice);
  }

  #[test]
  fn test_list_reads_see_removal() {
    let store = OverlayStore::new();
    let rows = vec![row()];

    store.add_pending_change(42, fields(&[("cost", serde_json::json!(0.0))]));
    assert_eq!(store.optimistic_views(&rows)[0].cost, 0.0);

    store.remove_pending_change(42);
    assert_eq!(store.optimistic_views(&rows)[0].cost, 15.99);
  }
}
