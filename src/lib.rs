//! Offline-first sync core for the subtrack subscription tracker.
//!
//! The crate keeps the app usable without a network: mutations apply
//! optimistically and queue in a durable action log, reads come from
//! TTL-bounded caches of server aggregates, currency conversion falls
//! back through cached and static rates, and a sync engine reconciles
//! the queue with the remote API once connectivity returns.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod net;
pub mod service;
pub mod store;
pub mod sync;
