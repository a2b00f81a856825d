//! Background revalidation tracking
//!
//! Deduplicates background refreshes: at most one refresh per cache key may be
//! in flight. A refresh holds a [`RevalidationGuard`] for its whole lifetime;
//! dropping the guard releases the key, so a failed or panicking refresh can
//! never leave its key marked.

use std::sync::Arc;

use dashmap::DashSet;

/// Set of cache keys with an outstanding background refresh
#[derive(Debug, Default)]
pub struct RevalidationTracker {
    in_flight: DashSet<String>,
}

impl RevalidationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as refreshing
    ///
    /// Returns `None` when another refresh for `key` is already outstanding.
    pub fn try_acquire(self: &Arc<Self>, key: &str) -> Option<RevalidationGuard> {
        if self.in_flight.insert(key.to_string()) {
            Some(RevalidationGuard {
                tracker: Arc::clone(self),
                key: key.to_string(),
            })
        } else {
            None
        }
    }

    /// Whether a refresh for `key` is outstanding
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains(key)
    }

    /// Number of outstanding refreshes
    pub fn active(&self) -> usize {
        self.in_flight.len()
    }
}

/// Releases its key when dropped
#[derive(Debug)]
pub struct RevalidationGuard {
    tracker: Arc<RevalidationTracker>,
    key: String,
}

impl Drop for RevalidationGuard {
    fn drop(&mut self) {
        self.tracker.in_flight.remove(&self.key);
    }
}
