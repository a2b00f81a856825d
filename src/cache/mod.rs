//! Cache module for upstream API responses
//!
//! Responses are kept in a durable store (JSON files by default) with a TTL and
//! a UTC calendar-day expiry, falling back to process memory whenever the
//! durable store is unavailable. [`FetchCache`] wraps the store with
//! fetch-on-miss, serve-stale-on-error and stale-while-revalidate behavior.

mod durable;
mod entry;
mod fetch;
mod revalidation;
mod store;

pub use durable::{DurableStore, FileStore, MemoryStore, StoreError};
pub use entry::{canonical_params, compute_key, CacheEntry};
pub use fetch::{FetchCache, FetchOptions, WarmOutcome, DEFAULT_REVALIDATION_TIMEOUT};
pub use revalidation::{RevalidationGuard, RevalidationTracker};
pub use store::{CacheStats, CacheStore, RecentEntry};
