//! Versioned cache-entry envelope.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Bumped whenever the shape of any cached payload changes. Entries
/// written under an older version are treated as absent and evicted on
/// the next read instead of being misread into the new shape.
pub const SCHEMA_VERSION: u32 = 1;

/// A cached value with its freshness window.
///
/// `expires_at` is always `captured_at + ttl`; a read is a hit only while
/// `now <= expires_at`. Expired entries are logically absent and evicted
/// lazily on the next read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  pub captured_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
  pub schema_version: u32,
}

impl<T: Serialize + DeserializeOwned> CacheEntry<T> {
  pub fn new(data: T, captured_at: DateTime<Utc>, ttl: Duration) -> Self {
    Self {
      data,
      captured_at,
      expires_at: captured_at + ttl,
      schema_version: SCHEMA_VERSION,
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now > self.expires_at
  }

  /// Decode a persisted entry. Returns `None` for undecodable or
  /// wrong-version payloads so the caller evicts instead of misreading.
  pub fn decode(raw: &str) -> Option<Self> {
    let entry: Self = serde_json::from_str(raw).ok()?;
    if entry.schema_version != SCHEMA_VERSION {
      return None;
    }
    Some(entry)
  }

  pub fn encode(&self) -> serde_json::Result<String> {
    serde_json::to_string(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_expiry_boundary() {
    let captured = Utc::now();
    let entry = CacheEntry::new(42u32, captured, Duration::minutes(10));

    assert_eq!(entry.expires_at, captured + Duration::minutes(10));
    assert!(!entry.is_expired(captured + Duration::minutes(10) - Duration::seconds(1)));
    assert!(entry.is_expired(captured + Duration::minutes(10) + Duration::seconds(1)));
  }

  #[test]
  fn test_wrong_schema_version_is_absent() {
    let entry = CacheEntry::new("data".to_string(), Utc::now(), Duration::minutes(5));
    let mut raw: serde_json::Value = serde_json::from_str(&entry.encode().unwrap()).unwrap();
    raw["schema_version"] = serde_json::json!(SCHEMA_VERSION + 1);

    assert!(CacheEntry::<String>::decode(&raw.to_string()).is_none());
  }
}
