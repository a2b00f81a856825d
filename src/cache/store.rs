//! Cache store with in-memory fallback
//!
//! Wraps an optional durable backend. Every durable call goes through one
//! fallback decision point: when the backend errors, the store silently
//! degrades to a process-local map with plain age-based expiry. None of the
//! public methods return errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::durable::{DurableStore, StoreError};
use super::entry::CacheEntry;

/// Number of recent entries reported by [`CacheStore::stats`]
const RECENT_ENTRY_LIMIT: usize = 10;

/// Upper bound on fallback TTLs (100 years) to keep expiry arithmetic in range
const MAX_FALLBACK_TTL_SECONDS: i64 = 100 * 365 * 24 * 60 * 60;

/// Entry held by the in-memory fallback
#[derive(Debug, Clone)]
struct FallbackEntry {
    entry: CacheEntry,
    expires_at: DateTime<Utc>,
}

/// Summary of one recently written entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentEntry {
    pub endpoint: String,
    pub updated_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub age_seconds: i64,
}

/// Snapshot of what the cache currently holds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    /// Entry count per endpoint
    pub by_endpoint: BTreeMap<String, usize>,
    /// Most recently written entries, newest first
    pub recent: Vec<RecentEntry>,
}

/// Key/entry storage shared by every cache consumer in the process
pub struct CacheStore {
    durable: Option<Arc<dyn DurableStore>>,
    fallback: DashMap<String, FallbackEntry>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("durable", &self.durable.is_some())
            .field("fallback_entries", &self.fallback.len())
            .finish()
    }
}

impl CacheStore {
    /// Creates a store backed by `durable`
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        Self {
            durable: Some(durable),
            fallback: DashMap::new(),
        }
    }

    /// Creates a store that only uses the in-memory fallback
    pub fn memory_only() -> Self {
        Self {
            durable: None,
            fallback: DashMap::new(),
        }
    }

    /// Turns a durable result into `Some` on success, `None` when the caller
    /// should use the fallback map instead
    fn durable_ok<T>(&self, op: &'static str, result: Result<T, StoreError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(op, error = %err, "durable cache unavailable, using in-memory fallback");
                None
            }
        }
    }

    async fn load_durable(&self, key: &str) -> Option<Option<CacheEntry>> {
        let durable = self.durable.as_ref()?;
        self.durable_ok("load", durable.load(key).await)
    }

    /// Returns the entry under `key` if it is still fresh
    ///
    /// Durable entries expire on TTL or on UTC day rollover. Fallback entries
    /// only expire on TTL.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        if let Some(found) = self.load_durable(key).await {
            return found.filter(CacheEntry::is_fresh);
        }

        let held = self.fallback.get(key)?;
        if Utc::now() > held.expires_at {
            return None;
        }
        Some(held.entry.clone())
    }

    /// Returns the entry under `key` regardless of staleness
    pub async fn get_ignoring_freshness(&self, key: &str) -> Option<CacheEntry> {
        if let Some(found) = self.load_durable(key).await {
            return found;
        }
        self.fallback.get(key).map(|held| held.entry.clone())
    }

    /// Inserts or replaces the entry under `key`
    pub async fn set(
        &self,
        key: &str,
        endpoint: &str,
        params: &Value,
        response: Value,
        ttl_seconds: u64,
    ) {
        let entry = CacheEntry::new(key, endpoint, params, response, ttl_seconds);

        if let Some(durable) = &self.durable {
            if self.durable_ok("upsert", durable.upsert(&entry).await).is_some() {
                return;
            }
        }

        let ttl = i64::try_from(ttl_seconds)
            .unwrap_or(MAX_FALLBACK_TTL_SECONDS)
            .min(MAX_FALLBACK_TTL_SECONDS);
        let expires_at = entry.updated_at + Duration::seconds(ttl);
        self.fallback
            .insert(key.to_string(), FallbackEntry { entry, expires_at });
    }

    /// Removes every entry for `endpoint` from both stores
    ///
    /// Durable entries are matched on their recorded endpoint; fallback
    /// entries on their key starting with `endpoint`.
    pub async fn clear_by_endpoint(&self, endpoint: &str) {
        let mut removed = 0;
        if let Some(durable) = &self.durable {
            removed += self
                .durable_ok("delete_endpoint", durable.delete_endpoint(endpoint).await)
                .unwrap_or(0);
        }

        let before = self.fallback.len();
        self.fallback.retain(|key, _| !key.starts_with(endpoint));
        removed += before - self.fallback.len();

        info!(endpoint, removed, "cache cleared for endpoint");
    }

    /// Removes every entry last written before `cutoff`, returning the count
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        if let Some(durable) = &self.durable {
            removed += self
                .durable_ok("delete_updated_before", durable.delete_updated_before(cutoff).await)
                .unwrap_or(0);
        }

        let before = self.fallback.len();
        self.fallback.retain(|_, held| held.entry.updated_at >= cutoff);
        removed += before - self.fallback.len();

        info!(%cutoff, removed, "purged old cache entries");
        removed
    }

    /// Summarizes the entries currently held by both stores
    pub async fn stats(&self) -> CacheStats {
        let mut entries: Vec<CacheEntry> = match &self.durable {
            Some(durable) => self
                .durable_ok("entries", durable.entries().await)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        entries.extend(self.fallback.iter().map(|held| held.entry.clone()));

        let mut by_endpoint = BTreeMap::new();
        for entry in &entries {
            *by_endpoint.entry(entry.endpoint.clone()).or_insert(0) += 1;
        }

        let now = Utc::now();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let recent = entries
            .iter()
            .take(RECENT_ENTRY_LIMIT)
            .map(|entry| RecentEntry {
                endpoint: entry.endpoint.clone(),
                updated_at: entry.updated_at,
                ttl_seconds: entry.ttl_seconds,
                age_seconds: entry.age_at(now).num_seconds(),
            })
            .collect();

        CacheStats {
            total_entries: entries.len(),
            by_endpoint,
            recent,
        }
    }
}
