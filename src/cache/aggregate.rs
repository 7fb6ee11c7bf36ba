//! Read-through cache for server-derived aggregates.
//!
//! Keys compose a logical resource name and its effective query parameters
//! ("dashboard_stats:EUR"), so the same resource in two currencies caches
//! independently. Reads are stale-while-revalidate: a cache hit is served
//! immediately and, when online, a background refresh is spawned; read
//! views subscribe to learn when the refresh lands.

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::api::{ApiError, ApiResult};
use crate::clock::Clock;
use crate::store::KeyValueStore;

use super::entry::CacheEntry;

/// Storage-key namespace, kept out of caller-visible keys.
const PREFIX: &str = "agg:";

/// Where the data of a read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
  /// Fresh data fetched in the foreground
  Network,
  /// Non-expired cache entry
  CacheFresh,
}

/// Result of a read-through fetch.
#[derive(Debug, Clone)]
pub struct CachedRead<T> {
  pub data: T,
  pub source: ReadSource,
  pub captured_at: Option<DateTime<Utc>>,
  /// A background refresh was spawned for this read
  pub refreshing: bool,
}

#[derive(Debug, Error)]
pub enum FetchError {
  /// Offline with nothing cached: a distinct condition the UI renders as
  /// "no data yet", not a generic failure.
  #[error("offline and no cached data for {key}")]
  OfflineNoData { key: String },

  #[error(transparent)]
  Api(#[from] ApiError),

  #[error("cache storage failure: {0}")]
  Storage(String),
}

/// TTL-bounded cache over the durable key-value store.
pub struct AggregateCache<S> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  refreshed: broadcast::Sender<String>,
}

impl<S: KeyValueStore + 'static> AggregateCache<S> {
  pub fn new(storage: Arc<S>, clock: Arc<dyn Clock>) -> Self {
    let (refreshed, _) = broadcast::channel(64);
    Self {
      storage,
      clock,
      refreshed,
    }
  }

  /// Notified with the cache key each time a background refresh lands.
  pub fn subscribe(&self) -> broadcast::Receiver<String> {
    self.refreshed.subscribe()
  }

  /// Non-expired entry for `key`, or `None`. Expired and wrong-version
  /// entries are evicted here, lazily.
  fn entry<T: Serialize + DeserializeOwned>(
    &self,
    key: &str,
  ) -> Result<Option<CacheEntry<T>>, FetchError> {
    let storage_key = format!("{}{}", PREFIX, key);
    let raw = self
      .storage
      .get_item(&storage_key)
      .map_err(|e| FetchError::Storage(e.to_string()))?;

    let raw = match raw {
      Some(raw) => raw,
      None => return Ok(None),
    };

    if let Some(entry) = CacheEntry::<T>::decode(&raw) {
      if !entry.is_expired(self.clock.now()) {
        return Ok(Some(entry));
      }
    }

    // Expired or undecodable: logically absent, evict.
    let _ = self.storage.remove_item(&storage_key);
    Ok(None)
  }

  /// Get the cached value for `key`, respecting its TTL.
  pub fn get<T: Serialize + DeserializeOwned>(&self, key: &str) -> Result<Option<T>, FetchError> {
    Ok(self.entry(key)?.map(|e| e.data))
  }

  /// Cache `value` under `key` for `ttl_minutes`.
  pub fn set<T: Serialize + DeserializeOwned>(
    &self,
    key: &str,
    value: &T,
    ttl_minutes: i64,
  ) -> Result<(), FetchError>
  where
    T: Clone,
  {
    let entry = CacheEntry::new(
      value.clone(),
      self.clock.now(),
      Duration::minutes(ttl_minutes),
    );
    let raw = entry
      .encode()
      .map_err(|e| FetchError::Storage(e.to_string()))?;
    self
      .storage
      .set_item(&format!("{}{}", PREFIX, key), &raw)
      .map_err(|e| FetchError::Storage(e.to_string()))
  }

  pub fn invalidate(&self, key: &str) -> Result<(), FetchError> {
    self
      .storage
      .remove_item(&format!("{}{}", PREFIX, key))
      .map_err(|e| FetchError::Storage(e.to_string()))
  }

  /// Invalidate every entry whose key starts with `prefix`.
  pub fn invalidate_all(&self, prefix: &str) -> Result<(), FetchError> {
    let full_prefix = format!("{}{}", PREFIX, prefix);
    let keys = self
      .storage
      .keys()
      .map_err(|e| FetchError::Storage(e.to_string()))?;

    for key in keys.iter().filter(|k| k.starts_with(&full_prefix)) {
      self
        .storage
        .remove_item(key)
        .map_err(|e| FetchError::Storage(e.to_string()))?;
    }
    Ok(())
  }

  /// Read-through fetch with stale-while-revalidate semantics.
  ///
  /// A cache hit is returned immediately; when online, a background
  /// refresh is spawned and its completion announced on [`subscribe`].
  /// A miss fetches in the foreground when online and reports
  /// [`FetchError::OfflineNoData`] otherwise.
  ///
  /// [`subscribe`]: AggregateCache::subscribe
  pub async fn fetch_and_cache<T, F>(
    &self,
    key: &str,
    ttl_minutes: i64,
    is_online: bool,
    fetcher: F,
  ) -> Result<CachedRead<T>, FetchError>
  where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
    F: FnOnce() -> BoxFuture<'static, ApiResult<T>>,
  {
    if let Some(entry) = self.entry::<T>(key)? {
      if is_online {
        self.spawn_refresh(key, ttl_minutes, fetcher());
      }
      return Ok(CachedRead {
        data: entry.data,
        source: ReadSource::CacheFresh,
        captured_at: Some(entry.captured_at),
        refreshing: is_online,
      });
    }

    if !is_online {
      return Err(FetchError::OfflineNoData {
        key: key.to_string(),
      });
    }

    let data = fetcher().await?;
    self.set(key, &data, ttl_minutes)?;
    Ok(CachedRead {
      data,
      source: ReadSource::Network,
      captured_at: None,
      refreshing: false,
    })
  }

  fn spawn_refresh<T>(&self, key: &str, ttl_minutes: i64, fetch: BoxFuture<'static, ApiResult<T>>)
  where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    let clock = Arc::clone(&self.clock);
    let refreshed = self.refreshed.clone();
    let key = key.to_string();

    tokio::spawn(async move {
      match fetch.await {
        Ok(data) => {
          let entry = CacheEntry::new(data, clock.now(), Duration::minutes(ttl_minutes));
          match entry.encode() {
            Ok(raw) => {
              if let Err(e) = storage.set_item(&format!("{}{}", PREFIX, key), &raw) {
                debug!(key, error = %e, "background refresh could not persist");
                return;
              }
              // Nobody listening is fine.
              let _ = refreshed.send(key);
            }
            Err(e) => debug!(key, error = %e, "background refresh could not serialize"),
          }
        }
        Err(e) => debug!(key, error = %e, "background refresh failed"),
      }
    });
  }
}

impl<S> Clone for AggregateCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
      refreshed: self.refreshed.clone(),
    }
  }
}
