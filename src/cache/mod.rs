//! Time-bounded caching of server-derived data.
//!
//! Two caches share the durable key-value store: the aggregate cache
//! (dashboard reads, keyed by resource + query params) and the currency
//! conversion cache (exchange-rate snapshots with a static offline
//! fallback). Both serve degraded stale data rather than failing hard.

mod aggregate;
mod entry;
mod rates;

pub use aggregate::{AggregateCache, CachedRead, FetchError, ReadSource};
pub use entry::CacheEntry;
pub use rates::{ConvertedAmount, CurrencyCache, ExchangeRateSnapshot, RatesLookup};
