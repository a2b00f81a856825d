//! Fetch-through cache
//!
//! Orchestrates lookup, fetch-on-miss, serve-stale and background refresh
//! around a caller-supplied fetcher. Payloads are stored as JSON values, so
//! the engine stays agnostic of what it caches; callers get typed values back.

use std::fmt::Display;
use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::entry::{compute_key, CacheEntry};
use super::revalidation::RevalidationTracker;
use super::store::CacheStore;

/// Default upper bound on a single background refresh
pub const DEFAULT_REVALIDATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-call behavior switches for [`FetchCache::fetch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Serve the last known value when the fetcher fails
    pub allow_stale_on_error: bool,
    /// Serve an expired value immediately and refresh it in the background
    pub stale_while_revalidate: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            allow_stale_on_error: true,
            stale_while_revalidate: false,
        }
    }
}

impl FetchOptions {
    /// Options with stale-while-revalidate enabled
    pub fn revalidating() -> Self {
        Self {
            stale_while_revalidate: true,
            ..Self::default()
        }
    }
}

/// What happened when warming a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmOutcome {
    /// A fresh entry already existed
    Skipped,
    /// The fetcher ran and its result was stored
    Warmed,
    /// The fetcher failed; nothing was stored
    Failed,
}

/// Cache service shared by every geo and shipping lookup in the process
///
/// Cloning is cheap; all clones share one store, one revalidation set and
/// one set of background refresh tasks. Refreshes still running when the last
/// clone is dropped are aborted, so short-lived callers should await
/// [`FetchCache::drain_revalidations`] before exiting.
#[derive(Debug, Clone)]
pub struct FetchCache {
    store: Arc<CacheStore>,
    revalidation: Arc<RevalidationTracker>,
    revalidation_timeout: Option<Duration>,
    refreshes: Arc<Mutex<JoinSet<()>>>,
}

impl FetchCache {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store: Arc::new(store),
            revalidation: Arc::new(RevalidationTracker::new()),
            revalidation_timeout: Some(DEFAULT_REVALIDATION_TIMEOUT),
            refreshes: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Overrides the background refresh timeout; `None` waits indefinitely
    pub fn with_revalidation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.revalidation_timeout = timeout;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn revalidation(&self) -> &RevalidationTracker {
        &self.revalidation
    }

    /// Returns the cached value for `endpoint`/`params`, fetching on a miss
    ///
    /// 1. A fresh entry is returned without calling `fetcher`.
    /// 2. With `stale_while_revalidate`, an expired entry is returned at once
    ///    and a single background task per key refreshes it.
    /// 3. Otherwise `fetcher` runs once; its result is stored and returned. If
    ///    it fails and `allow_stale_on_error` is set, the expired entry is
    ///    returned instead.
    ///
    /// The only error this returns is the fetcher's own, and only when there
    /// was nothing cached to fall back on.
    pub async fn fetch<T, E, F, Fut>(
        &self,
        endpoint: &str,
        params: &Value,
        fetcher: F,
        ttl_seconds: u64,
        options: FetchOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = compute_key(endpoint, params);

        if let Some(fresh) = self.store.get(&key).await.and_then(decode::<T>) {
            return Ok(fresh);
        }

        if options.stale_while_revalidate {
            if let Some(stale) = self.store.get_ignoring_freshness(&key).await.and_then(decode::<T>) {
                self.spawn_revalidation(key, endpoint, params, fetcher, ttl_seconds);
                return Ok(stale);
            }
        }

        match fetcher().await {
            Ok(fresh) => {
                store_value(&self.store, &key, endpoint, params, &fresh, ttl_seconds).await;
                Ok(fresh)
            }
            Err(err) => {
                if options.allow_stale_on_error {
                    let stale = self.store.get_ignoring_freshness(&key).await.and_then(decode::<T>);
                    if let Some(stale) = stale {
                        warn!(endpoint, error = %err, "returning stale cache due to fetch error");
                        return Ok(stale);
                    }
                }
                Err(err)
            }
        }
    }

    /// Refreshes `key` in the background unless a refresh is already running
    fn spawn_revalidation<T, E, F, Fut>(
        &self,
        key: String,
        endpoint: &str,
        params: &Value,
        fetcher: F,
        ttl_seconds: u64,
    ) where
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let Some(guard) = self.revalidation.try_acquire(&key) else {
            debug!(endpoint, "revalidation already in flight");
            return;
        };

        let store = Arc::clone(&self.store);
        let endpoint = endpoint.to_string();
        let params = params.clone();
        let timeout = self.revalidation_timeout;

        let refresh = async move {
            // Released on every exit path, including panics inside the fetcher.
            let _guard = guard;

            let fetched = match timeout {
                Some(limit) => match tokio::time::timeout(limit, fetcher()).await {
                    Ok(result) => result.map_err(|err| err.to_string()),
                    Err(_) => Err(format!("timed out after {}s", limit.as_secs())),
                },
                None => fetcher().await.map_err(|err| err.to_string()),
            };

            // Encoded before the next await so the task never holds a `&T`.
            let response = fetched
                .and_then(|fresh| serde_json::to_value(&fresh).map_err(|err| err.to_string()));
            match response {
                Ok(response) => {
                    store.set(&key, &endpoint, &params, response, ttl_seconds).await;
                    debug!(endpoint = %endpoint, "background revalidation stored fresh value");
                }
                Err(reason) => {
                    warn!(endpoint = %endpoint, error = %reason, "background revalidation failed");
                }
            }
        };

        let mut refreshes = self.refreshes.lock().unwrap_or_else(PoisonError::into_inner);
        while refreshes.try_join_next().is_some() {}
        refreshes.spawn(refresh);
    }

    /// Waits for every background refresh started so far
    ///
    /// Each refresh is bounded by the revalidation timeout, so this returns
    /// within that bound. Returns how many refreshes were awaited.
    pub async fn drain_revalidations(&self) -> usize {
        let mut pending = {
            let mut refreshes = self.refreshes.lock().unwrap_or_else(PoisonError::into_inner);
            mem::take(&mut *refreshes)
        };

        let mut finished = 0;
        while let Some(result) = pending.join_next().await {
            if let Err(err) = result {
                warn!(error = %err, "background revalidation task did not complete");
            }
            finished += 1;
        }
        finished
    }

    /// Whether a fresh entry exists for `endpoint`/`params`
    pub async fn is_fresh(&self, endpoint: &str, params: &Value) -> bool {
        self.store.get(&compute_key(endpoint, params)).await.is_some()
    }

    /// Populates the entry for `endpoint`/`params` unless it is already fresh
    ///
    /// Failures are logged and reported, never raised.
    pub async fn warm<T, E, F, Fut>(
        &self,
        endpoint: &str,
        params: &Value,
        fetcher: F,
        ttl_seconds: u64,
    ) -> WarmOutcome
    where
        T: Serialize,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = compute_key(endpoint, params);
        if self.store.get(&key).await.is_some() {
            return WarmOutcome::Skipped;
        }

        match fetcher().await {
            Ok(data) => {
                store_value(&self.store, &key, endpoint, params, &data, ttl_seconds).await;
                debug!(endpoint, "cache warmed");
                WarmOutcome::Warmed
            }
            Err(err) => {
                warn!(endpoint, error = %err, "failed to warm cache");
                WarmOutcome::Failed
            }
        }
    }

    /// Removes every entry for `endpoint` from durable and in-memory storage
    pub async fn clear_by_endpoint(&self, endpoint: &str) {
        self.store.clear_by_endpoint(endpoint).await;
    }
}

/// Decodes a cached payload, treating undecodable entries as misses
fn decode<T: DeserializeOwned>(entry: CacheEntry) -> Option<T> {
    match serde_json::from_value(entry.response) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(key = %entry.key, error = %err, "ignoring cache entry with unexpected shape");
            None
        }
    }
}

async fn store_value<T: Serialize>(
    store: &CacheStore,
    key: &str,
    endpoint: &str,
    params: &Value,
    value: &T,
    ttl_seconds: u64,
) {
    match serde_json::to_value(value) {
        Ok(response) => store.set(key, endpoint, params, response, ttl_seconds).await,
        Err(err) => warn!(endpoint, error = %err, "cache set error"),
    }
}
