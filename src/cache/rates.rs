//! Currency conversion with a time-bounded exchange-rate cache.
//!
//! Rate lookups degrade in order: fresh cached snapshot, live fetch with a
//! short timeout, most recent cached snapshot even when expired, and
//! finally a static approximate table. Every converted value carries an
//! `is_stale` flag so presentation can warn when a degraded rate was used.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::RateSource;
use crate::clock::Clock;
use crate::store::KeyValueStore;

use super::entry::CacheEntry;

/// Default freshness window for fetched snapshots.
const DEFAULT_TTL_MINUTES: i64 = 60;

/// Rate fetches are raced against this timeout; losers fall back to cache.
const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Approximate USD-based rates used when nothing better is available.
/// Pairs not covered here convert at 1:1.
const USD_FALLBACK_RATES: &[(&str, f64)] = &[
  ("USD", 1.0),
  ("EUR", 0.85),
  ("GBP", 0.73),
  ("JPY", 110.0),
  ("CAD", 1.25),
  ("AUD", 1.35),
  ("CHF", 0.92),
  ("CNY", 6.45),
  ("INR", 74.5),
  ("SEK", 8.6),
  ("NOK", 8.5),
  ("MXN", 20.0),
  ("BRL", 5.2),
];

/// A captured set of multiplicative factors from one base currency.
/// Invariant: `rates[base] == 1`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExchangeRateSnapshot {
  pub base: String,
  pub rates: HashMap<String, f64>,
  pub captured_at: DateTime<Utc>,
}

/// Result of a snapshot lookup, with derived staleness.
#[derive(Debug, Clone)]
pub struct RatesLookup {
  pub snapshot: ExchangeRateSnapshot,
  pub is_stale: bool,
}

/// A single converted amount. No rounding is applied at this layer;
/// presentation formatting rounds separately.
#[derive(Debug, Clone)]
pub struct ConvertedAmount {
  pub converted_amount: f64,
  pub exchange_rate: f64,
  pub timestamp: DateTime<Utc>,
  pub is_stale: bool,
}

/// Time-bounded exchange-rate cache with offline fallbacks.
pub struct CurrencyCache<S> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  source: Arc<dyn RateSource>,
  online_rx: watch::Receiver<bool>,
  ttl: Duration,
  max_age: Duration,
}

impl<S: KeyValueStore> CurrencyCache<S> {
  pub fn new(
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    source: Arc<dyn RateSource>,
    online_rx: watch::Receiver<bool>,
  ) -> Self {
    let ttl = Duration::minutes(DEFAULT_TTL_MINUTES);
    Self {
      storage,
      clock,
      source,
      online_rx,
      ttl,
      max_age: ttl,
    }
  }

  /// Tighten (or relax) the staleness threshold independently of the TTL.
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  fn storage_key(base: &str) -> String {
    format!("rates:{}", base)
  }

  fn is_online(&self) -> bool {
    *self.online_rx.borrow()
  }

  /// Read the persisted snapshot for `base`, expired or not. The expired
  /// copy stays on disk: it is the fallback of last resort before the
  /// static table.
  fn cached(&self, base: &str) -> Option<CacheEntry<ExchangeRateSnapshot>> {
    let raw = self.storage.get_item(&Self::storage_key(base)).ok()??;
    CacheEntry::decode(&raw)
  }

  fn derived_staleness(&self, snapshot: &ExchangeRateSnapshot) -> bool {
    self.clock.now() - snapshot.captured_at > self.max_age
  }

  fn fallback_snapshot(&self, base: &str) -> ExchangeRateSnapshot {
    let base_per_usd = USD_FALLBACK_RATES
      .iter()
      .find(|(code, _)| *code == base)
      .map(|(_, rate)| *rate);

    let mut rates = HashMap::new();
    for (code, usd_rate) in USD_FALLBACK_RATES {
      let rate = match base_per_usd {
        Some(base_rate) => usd_rate / base_rate,
        None => 1.0,
      };
      rates.insert((*code).to_string(), rate);
    }
    rates.insert(base.to_string(), 1.0);

    ExchangeRateSnapshot {
      base: base.to_string(),
      rates,
      captured_at: self.clock.now(),
    }
  }

  /// Get a rate snapshot for `base`.
  ///
  /// Order: non-expired cached snapshot; static fallback when offline;
  /// live fetch (persisted with the configured TTL); most recent cached
  /// snapshot even if expired; static fallback.
  pub async fn get_rates(&self, base: &str) -> Result<RatesLookup> {
    let now = self.clock.now();
    let cached = self.cached(base);

    if let Some(entry) = &cached {
      if !entry.is_expired(now) {
        return Ok(RatesLookup {
          is_stale: self.derived_staleness(&entry.data),
          snapshot: entry.data.clone(),
        });
      }
    }

    if !self.is_online() {
      debug!(base, "offline, using fallback rates");
      return Ok(RatesLookup {
        snapshot: cached
          .map(|entry| entry.data)
          .unwrap_or_else(|| self.fallback_snapshot(base)),
        is_stale: true,
      });
    }

    let fetch = self.source.fetch_rates(base);
    match tokio::time::timeout(FETCH_TIMEOUT, fetch).await {
      Ok(Ok(response)) => {
        let mut rates = response.rates;
        rates.insert(base.to_string(), 1.0);
        let snapshot = ExchangeRateSnapshot {
          base: base.to_string(),
          rates,
          captured_at: now,
        };

        let entry = CacheEntry::new(snapshot.clone(), now, self.ttl);
        let raw = entry
          .encode()
          .map_err(|e| eyre!("Failed to serialize rate snapshot: {}", e))?;
        self.storage.set_item(&Self::storage_key(base), &raw)?;

        Ok(RatesLookup {
          snapshot,
          is_stale: false,
        })
      }
      Ok(Err(e)) => {
        warn!(base, error = %e, "rate fetch failed, falling back");
        Ok(self.degraded_lookup(base, cached))
      }
      Err(_) => {
        warn!(base, "rate fetch timed out, falling back");
        Ok(self.degraded_lookup(base, cached))
      }
    }
  }

  /// Most recent cached snapshot (even expired), else the static table.
  fn degraded_lookup(
    &self,
    base: &str,
    cached: Option<CacheEntry<ExchangeRateSnapshot>>,
  ) -> RatesLookup {
    RatesLookup {
      snapshot: cached
        .map(|entry| entry.data)
        .unwrap_or_else(|| self.fallback_snapshot(base)),
      is_stale: true,
    }
  }

  /// Convert `amount` from one currency to another.
  pub async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<ConvertedAmount> {
    if from == to {
      return Ok(ConvertedAmount {
        converted_amount: amount,
        exchange_rate: 1.0,
        timestamp: self.clock.now(),
        is_stale: false,
      });
    }

    let lookup = self.get_rates(from).await?;
    Ok(Self::apply(amount, to, &lookup))
  }

  /// Convert many amounts into `target`, fetching at most one snapshot
  /// per distinct source currency.
  pub async fn batch_convert(
    &self,
    items: &[(f64, String)],
    target: &str,
  ) -> Result<Vec<ConvertedAmount>> {
    let mut currencies: Vec<&str> = items
      .iter()
      .map(|(_, currency)| currency.as_str())
      .filter(|currency| *currency != target)
      .collect();
    currencies.sort_unstable();
    currencies.dedup();

    let lookups = join_all(currencies.iter().map(|currency| self.get_rates(currency))).await;

    let mut by_currency: HashMap<&str, RatesLookup> = HashMap::new();
    for (currency, lookup) in currencies.iter().zip(lookups) {
      by_currency.insert(currency, lookup?);
    }

    let now = self.clock.now();
    Ok(
      items
        .iter()
        .map(|(amount, currency)| {
          if currency == target {
            ConvertedAmount {
              converted_amount: *amount,
              exchange_rate: 1.0,
              timestamp: now,
              is_stale: false,
            }
          } else {
            // Present for every non-target currency by construction.
            Self::apply(*amount, target, &by_currency[currency.as_str()])
          }
        })
        .collect(),
    )
  }

  fn apply(amount: f64, to: &str, lookup: &RatesLookup) -> ConvertedAmount {
    let rate = lookup.snapshot.rates.get(to).copied().unwrap_or(1.0);
    ConvertedAmount {
      converted_amount: amount * rate,
      exchange_rate: rate,
      timestamp: lookup.snapshot.captured_at,
      is_stale: lookup.is_stale,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::RatesResponse;
  use crate::api::{ApiError, ApiResult};
  use crate::clock::ManualClock;
  use crate::store::MemoryStore;
  use futures::future::BoxFuture;
  use std::sync::atomic::{AtomicU32, Ordering};

  /// Rate source serving a fixed response, counting calls.
  struct FixedRates {
    rates: HashMap<String, f64>,
    calls: AtomicU32,
    fail: bool,
  }

  impl FixedRates {
    fn new(pairs: &[(&str, f64)]) -> Self {
      Self {
        rates: pairs
          .iter()
          .map(|(code, rate)| ((*code).to_string(), *rate))
          .collect(),
        calls: AtomicU32::new(0),
        fail: false,
      }
    }

    fn failing() -> Self {
      Self {
        rates: HashMap::new(),
        calls: AtomicU32::new(0),
        fail: true,
      }
    }
  }

  impl RateSource for FixedRates {
    fn fetch_rates(&self, base: &str) -> BoxFuture<'static, ApiResult<RatesResponse>> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      let result = if self.fail {
        Err(ApiError::Server { status: 500 })
      } else {
        Ok(RatesResponse {
          base: base.to_string(),
          rates: self.rates.clone(),
        })
      };
      Box::pin(async move { result })
    }
  }

  struct Fixture {
    cache: CurrencyCache<MemoryStore>,
    clock: Arc<ManualClock>,
    source: Arc<FixedRates>,
    online_tx: watch::Sender<bool>,
  }

  fn fixture(source: FixedRates, online: bool) -> Fixture {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let source = Arc::new(source);
    let (online_tx, online_rx) = watch::channel(online);
    let cache = CurrencyCache::new(
      Arc::new(MemoryStore::new()),
      clock.clone(),
      source.clone(),
      online_rx,
    );
    Fixture {
      cache,
      clock,
      source,
      online_tx,
    }
  }

  #[tokio::test]
  async fn test_same_currency_is_identity() {
    let f = fixture(FixedRates::failing(), false);

    let result = f.cache.convert(12.5, "USD", "USD").await.unwrap();
    assert_eq!(result.converted_amount, 12.5);
    assert_eq!(result.exchange_rate, 1.0);
    assert!(!result.is_stale);
  }

  #[tokio::test]
  async fn test_offline_no_cache_uses_static_table() {
    let f = fixture(FixedRates::failing(), false);

    let lookup = f.cache.get_rates("USD").await.unwrap();
    assert!(lookup.is_stale);
    assert!((lookup.snapshot.rates["EUR"] - 0.85).abs() < 1e-9);
    assert_eq!(lookup.snapshot.rates["USD"], 1.0);
    assert_eq!(f.source.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_unknown_base_falls_back_to_one_to_one() {
    let f = fixture(FixedRates::failing(), false);

    let lookup = f.cache.get_rates("XXX").await.unwrap();
    assert_eq!(lookup.snapshot.rates["EUR"], 1.0);
    assert_eq!(lookup.snapshot.rates["XXX"], 1.0);
  }

  #[tokio::test]
  async fn test_fetch_persists_and_serves_from_cache() {
    let f = fixture(FixedRates::new(&[("EUR", 0.9)]), true);

    let first = f.cache.get_rates("USD").await.unwrap();
    assert!(!first.is_stale);
    assert_eq!(first.snapshot.rates["USD"], 1.0);

    // Second lookup within the TTL must not refetch.
    let second = f.cache.get_rates("USD").await.unwrap();
    assert_eq!(second.snapshot.rates["EUR"], 0.9);
    assert_eq!(f.source.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_fetch_failure_serves_expired_snapshot_marked_stale() {
    let f = fixture(FixedRates::new(&[("EUR", 0.9)]), true);

    f.cache.get_rates("USD").await.unwrap();

    // Expire the snapshot, then break the source.
    f.clock.advance(Duration::minutes(DEFAULT_TTL_MINUTES + 1));
    let f2 = Fixture {
      cache: CurrencyCache::new(
        f.cache.storage.clone(),
        f.clock.clone(),
        Arc::new(FixedRates::failing()),
        f.online_tx.subscribe(),
      ),
      clock: f.clock.clone(),
      source: f.source.clone(),
      online_tx: f.online_tx,
    };

    let lookup = f2.cache.get_rates("USD").await.unwrap();
    assert!(lookup.is_stale);
    assert_eq!(lookup.snapshot.rates["EUR"], 0.9);
  }

  #[tokio::test]
  async fn test_batch_convert_fetches_once_per_currency() {
    let f = fixture(FixedRates::new(&[("USD", 1.1)]), true);

    let items = vec![
      (10.0, "EUR".to_string()),
      (20.0, "EUR".to_string()),
      (5.0, "USD".to_string()),
      (7.0, "GBP".to_string()),
    ];

    let results = f.cache.batch_convert(&items, "USD").await.unwrap();
    assert_eq!(results.len(), 4);

    // Same-currency item short-circuits.
    assert_eq!(results[2].converted_amount, 5.0);
    assert!(!results[2].is_stale);

    // EUR items share one conversion rate.
    assert!((results[0].converted_amount - 11.0).abs() < 1e-9);
    assert!((results[1].converted_amount - 22.0).abs() < 1e-9);

    // One fetch per distinct non-target currency: EUR and GBP.
    assert_eq!(f.source.calls.load(Ordering::SeqCst), 2);
  }
}
