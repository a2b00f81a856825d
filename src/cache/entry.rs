//! Cache entries and key derivation
//!
//! A cache entry wraps an opaque JSON response together with the endpoint and
//! parameters it was fetched with, its TTL, and the time it was last written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A single cached upstream response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Deterministic key derived from `endpoint` and `params`
    pub key: String,
    /// Upstream endpoint path the response came from
    pub endpoint: String,
    /// Canonical JSON text of the request parameters
    pub params: String,
    /// The cached payload
    pub response: Value,
    /// How long the entry stays fresh after `updated_at`
    pub ttl_seconds: u64,
    /// When the entry was last written
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Builds an entry stamped with the current time
    pub fn new(
        key: impl Into<String>,
        endpoint: impl Into<String>,
        params: &Value,
        response: Value,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            key: key.into(),
            endpoint: endpoint.into(),
            params: canonical_params(params),
            response,
            ttl_seconds,
            updated_at: Utc::now(),
        }
    }

    /// Age of the entry at `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }

    /// Whether the entry is still usable at `now`
    ///
    /// An entry goes stale once its TTL has elapsed, and also as soon as the
    /// UTC calendar day rolls over after it was written, whichever comes first.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let ttl_millis = i64::try_from(self.ttl_seconds)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000);
        if self.age_at(now).num_milliseconds() > ttl_millis {
            return false;
        }
        self.updated_at.date_naive() == now.date_naive()
    }

    /// Whether the entry is still usable right now
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

/// Serializes params into canonical JSON text
///
/// `serde_json` keeps object keys sorted, so two maps with the same contents
/// always produce the same text regardless of insertion order. `null` is
/// treated as an empty object.
pub fn canonical_params(params: &Value) -> String {
    match params {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

/// Derives the cache key for an endpoint and its parameters
///
/// The key is the endpoint followed by the hex SHA-256 of the canonical
/// params, so every key under an endpoint shares the endpoint as a prefix.
pub fn compute_key(endpoint: &str, params: &Value) -> String {
    let digest = Sha256::digest(canonical_params(params).as_bytes());
    format!("{}:{}", endpoint, hex::encode(digest))
}
