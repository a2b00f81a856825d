//! Prefix reuse for destination autocomplete
//!
//! Progressive typing ("jak", "jaka", "jakar"...) rarely needs a fresh
//! provider call: a cached result for a shorter prefix is a superset of the
//! longer query's matches. Reuse filters those cached items by plain
//! substring match on their display name, which is not the provider's own
//! ranking, so a reused result may differ slightly from what the provider
//! would return for the full query.

use tracing::debug;

use super::geo::{search_lookup, SEARCH_ENDPOINT, SEARCH_TTL_SECONDS};
use super::GeoLocation;
use crate::cache::{compute_key, CacheStore};

/// Shortest query (in characters) that takes part in prefix reuse
pub const MIN_QUERY_CHARS: usize = 3;

/// Trims and lowercases a search query
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Whether a normalized query is long enough for prefix reuse
pub fn qualifies(query: &str) -> bool {
    query.chars().count() >= MIN_QUERY_CHARS
}

/// Items whose display name contains `query`, ignoring case
pub fn filter_by_name(items: &[GeoLocation], query: &str) -> Vec<GeoLocation> {
    let needle = query.to_lowercase();
    items
        .iter()
        .filter(|item| item.display_name().to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

/// Tries to answer `query` from a cached shorter prefix
///
/// Prefixes are tried longest first, from one character shorter than the
/// query down to [`MIN_QUERY_CHARS`]. The first prefix whose cached items
/// (fresh or not) still match after filtering wins; the filtered set is
/// cached under the full query's key and returned.
pub async fn reuse_prefix(
    store: &CacheStore,
    query: &str,
    limit: u32,
    offset: u32,
) -> Option<Vec<GeoLocation>> {
    let chars: Vec<char> = query.chars().collect();
    if chars.len() < MIN_QUERY_CHARS {
        return None;
    }

    for len in (MIN_QUERY_CHARS..chars.len()).rev() {
        let prefix: String = chars[..len].iter().collect();
        let lookup = search_lookup(&prefix, limit, offset);

        let Some(entry) = store
            .get_ignoring_freshness(&compute_key(&lookup.endpoint, &lookup.params))
            .await
        else {
            continue;
        };
        let Ok(items) = serde_json::from_value::<Vec<GeoLocation>>(entry.response) else {
            continue;
        };
        if items.is_empty() {
            continue;
        }

        let filtered = filter_by_name(&items, query);
        if filtered.is_empty() {
            continue;
        }

        let full = search_lookup(query, limit, offset);
        match serde_json::to_value(&filtered) {
            Ok(response) => {
                store
                    .set(
                        &compute_key(&full.endpoint, &full.params),
                        SEARCH_ENDPOINT,
                        &full.params,
                        response,
                        SEARCH_TTL_SECONDS,
                    )
                    .await
            }
            Err(err) => debug!(error = %err, "could not cache reused prefix result"),
        }

        debug!(query, prefix = %prefix, hits = filtered.len(), "served search from cached prefix");
        return Some(filtered);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FetchCache, MemoryStore};
    use crate::data::client::testing::ScriptedTransport;
    use crate::data::GeoClient;
    use serde_json::json;
    use std::sync::Arc;

    fn location(label: &str) -> GeoLocation {
        GeoLocation {
            id: label.to_lowercase().replace(' ', "-"),
            label: label.to_string(),
            ..GeoLocation::default()
        }
    }

    async fn seed(store: &CacheStore, query: &str, labels: &[&str]) {
        let lookup = search_lookup(query, 10, 0);
        let items: Vec<GeoLocation> = labels.iter().map(|label| location(label)).collect();
        store
            .set(
                &compute_key(&lookup.endpoint, &lookup.params),
                SEARCH_ENDPOINT,
                &lookup.params,
                serde_json::to_value(items).unwrap(),
                SEARCH_TTL_SECONDS,
            )
            .await;
    }

    async fn cached_search(store: &CacheStore, query: &str) -> Option<Vec<GeoLocation>> {
        let lookup = search_lookup(query, 10, 0);
        let entry = store
            .get_ignoring_freshness(&compute_key(&lookup.endpoint, &lookup.params))
            .await?;
        serde_json::from_value(entry.response).ok()
    }

    fn labels(items: &[GeoLocation]) -> Vec<&str> {
        items.iter().map(|item| item.label.as_str()).collect()
    }

    #[test]
    fn test_normalize_and_qualify() {
        assert_eq!(normalize_query("  JaKa "), "jaka");
        assert!(qualifies("jak"));
        assert!(!qualifies("ja"));
    }

    #[test]
    fn test_filter_by_name_is_case_insensitive() {
        let items = vec![location("Jakarta Pusat"), location("Jayapura")];
        assert_eq!(labels(&filter_by_name(&items, "JAKA")), vec!["Jakarta Pusat"]);
    }

    #[tokio::test]
    async fn test_longer_query_reuses_cached_prefix() {
        let store = CacheStore::new(Arc::new(MemoryStore::new()));
        seed(&store, "jak", &["Jakarta Pusat", "Jakarta Timur", "Jayapura"]).await;

        let reused = reuse_prefix(&store, "jaka", 10, 0).await.expect("prefix hit");

        assert_eq!(labels(&reused), vec!["Jakarta Pusat", "Jakarta Timur"]);
        let cached = cached_search(&store, "jaka").await.expect("cached under full query");
        assert_eq!(cached, reused);
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let store = CacheStore::new(Arc::new(MemoryStore::new()));
        seed(&store, "jak", &["Jakarta Pusat", "Jakarta Timur"]).await;
        seed(&store, "jakar", &["Jakarta Timur"]).await;

        let reused = reuse_prefix(&store, "jakart", 10, 0).await.unwrap();

        assert_eq!(labels(&reused), vec!["Jakarta Timur"]);
    }

    #[tokio::test]
    async fn test_prefix_with_no_filtered_match_falls_through() {
        let store = CacheStore::new(Arc::new(MemoryStore::new()));
        seed(&store, "ban", &["Bandung", "Banten"]).await;

        assert!(reuse_prefix(&store, "banj", 10, 0).await.is_none());
    }

    #[tokio::test]
    async fn test_short_queries_and_other_pages_do_not_reuse() {
        let store = CacheStore::new(Arc::new(MemoryStore::new()));
        seed(&store, "jak", &["Jakarta Pusat"]).await;

        assert!(reuse_prefix(&store, "jak", 10, 0).await.is_none());
        assert!(reuse_prefix(&store, "jaka", 10, 10).await.is_none());
    }

    #[tokio::test]
    async fn test_search_uses_prefix_without_upstream_call() {
        let transport = Arc::new(ScriptedTransport::new());
        let cache = FetchCache::new(CacheStore::new(Arc::new(MemoryStore::new())));
        seed(cache.store(), "jak", &["Jakarta Pusat", "Jakarta Timur", "Jayapura"]).await;
        let geo = GeoClient::new(cache, transport.clone());

        let hits = geo.search_destinations("Jaka", 10, 0).await;

        assert_eq!(labels(&hits), vec!["Jakarta Pusat", "Jakarta Timur"]);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_search_falls_back_to_upstream_on_prefix_miss() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(SEARCH_ENDPOINT, json!([{"id": 1, "label": "SURABAYA"}]));
        let cache = FetchCache::new(CacheStore::new(Arc::new(MemoryStore::new())));
        let geo = GeoClient::new(cache, transport.clone());

        let hits = geo.search_destinations("sura", 10, 0).await;

        assert_eq!(labels(&hits), vec!["SURABAYA"]);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_search_prefers_fresh_exact_entry_over_prefix() {
        let transport = Arc::new(ScriptedTransport::new());
        let cache = FetchCache::new(CacheStore::new(Arc::new(MemoryStore::new())));
        seed(cache.store(), "jak", &["Jakarta Pusat", "Jakarta Timur"]).await;
        seed(cache.store(), "jaka", &["Jakarta Barat"]).await;
        let geo = GeoClient::new(cache, transport.clone());

        let hits = geo.search_destinations("jaka", 10, 0).await;

        assert_eq!(labels(&hits), vec!["Jakarta Barat"]);
        assert_eq!(transport.call_count(), 0);
    }
}
