//! Geography resolution client
//!
//! Province, city, district, subdistrict and free-text destination lookups,
//! all served through the shared [`FetchCache`]. Provider failures are logged
//! and surface as empty lists, which callers must read as "no data yet".

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::autocomplete;
use super::client::{Transport, UpstreamError};
use super::{GeoLocation, Province, Region};
use crate::cache::{FetchCache, FetchOptions, WarmOutcome};

/// Province list endpoint
pub const PROVINCES_ENDPOINT: &str = "/destination/province";

/// Free-text destination search endpoint
pub const SEARCH_ENDPOINT: &str = "/destination/domestic-destination";

/// Administrative hierarchy changes rarely: 30 days
pub const HIERARCHY_TTL_SECONDS: u64 = 60 * 60 * 24 * 30;

/// Search corpora change more often: 7 days
pub const SEARCH_TTL_SECONDS: u64 = 60 * 60 * 24 * 7;

/// Default page size for destination search
pub const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// Endpoint and cache params for one lookup
///
/// Live lookups and [`GeoClient`]'s warm methods build their keys from the
/// same `Lookup`, so warmed entries land where reads look.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub endpoint: String,
    pub params: Value,
}

pub fn provinces_lookup() -> Lookup {
    Lookup {
        endpoint: PROVINCES_ENDPOINT.to_string(),
        params: json!({}),
    }
}

pub fn cities_lookup(province_id: &str) -> Lookup {
    Lookup {
        endpoint: format!("/destination/city/{province_id}"),
        params: json!({ "provinceId": province_id }),
    }
}

pub fn districts_lookup(city_id: &str) -> Lookup {
    Lookup {
        endpoint: format!("/destination/district/{city_id}"),
        params: json!({ "cityId": city_id }),
    }
}

pub fn subdistricts_lookup(district_id: &str) -> Lookup {
    Lookup {
        endpoint: format!("/destination/sub-district/{district_id}"),
        params: json!({ "districtId": district_id }),
    }
}

/// `query` must already be normalized
pub fn search_lookup(query: &str, limit: u32, offset: u32) -> Lookup {
    Lookup {
        endpoint: SEARCH_ENDPOINT.to_string(),
        params: json!({ "search": query, "limit": limit, "offset": offset }),
    }
}

/// Uppercases a city name and strips a leading "KOTA " token
pub fn normalize_city_name(name: &str) -> String {
    let upper = name.trim().to_uppercase();
    match upper.strip_prefix("KOTA ") {
        Some(rest) => rest.trim().to_string(),
        None => upper,
    }
}

/// Finds a city whose normalized name equals `target`, else one containing it
fn match_city(cities: &[Region], target: &str) -> Option<String> {
    let normalized: Vec<(String, &Region)> = cities
        .iter()
        .map(|city| (normalize_city_name(&city.name), city))
        .collect();

    normalized
        .iter()
        .find(|(name, _)| name == target)
        .or_else(|| normalized.iter().find(|(name, _)| name.contains(target)))
        .map(|(_, city)| city.id.clone())
}

fn log_failure(endpoint: &str, err: &UpstreamError) {
    // The transport already reports a missing key once.
    if !matches!(err, UpstreamError::MissingApiKey) {
        warn!(endpoint, error = %err, "geo lookup failed; returning no data");
    }
}

/// Fetches `path` and decodes each item, dropping the ones `decode` rejects
fn load_list<T>(
    transport: Arc<dyn Transport>,
    path: String,
    query: Vec<(String, String)>,
    decode: fn(&Value) -> Option<T>,
) -> impl Future<Output = Result<Vec<T>, UpstreamError>> + Send
where
    T: Send + 'static,
{
    async move {
        let items = transport.get(&path, &query).await?;
        Ok(items.iter().filter_map(decode).collect())
    }
}

fn decode_location(item: &Value) -> Option<GeoLocation> {
    Some(GeoLocation::from_upstream(item))
}

fn search_query(query: &str, limit: u32, offset: u32) -> Vec<(String, String)> {
    vec![
        ("search".to_string(), query.to_string()),
        ("limit".to_string(), limit.to_string()),
        ("offset".to_string(), offset.to_string()),
    ]
}

/// Client for the provider's geography endpoints
#[derive(Clone)]
pub struct GeoClient {
    cache: FetchCache,
    transport: Arc<dyn Transport>,
}

impl GeoClient {
    pub fn new(cache: FetchCache, transport: Arc<dyn Transport>) -> Self {
        Self { cache, transport }
    }

    /// Fetches a hierarchy list through the cache, decoding each raw item
    async fn hierarchy<T>(&self, lookup: Lookup, decode: fn(&Value) -> Option<T>) -> Vec<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let path = lookup.endpoint.clone();

        self.cache
            .fetch(
                &lookup.endpoint,
                &lookup.params,
                move || load_list(transport, path, Vec::new(), decode),
                HIERARCHY_TTL_SECONDS,
                FetchOptions::default(),
            )
            .await
            .unwrap_or_else(|err| {
                log_failure(&lookup.endpoint, &err);
                Vec::new()
            })
    }

    /// Stores a hierarchy list unless its entry is still fresh
    async fn warm_hierarchy<T>(&self, lookup: Lookup, decode: fn(&Value) -> Option<T>) -> WarmOutcome
    where
        T: Serialize + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let path = lookup.endpoint.clone();

        self.cache
            .warm(
                &lookup.endpoint,
                &lookup.params,
                move || load_list(transport, path, Vec::new(), decode),
                HIERARCHY_TTL_SECONDS,
            )
            .await
    }

    pub async fn warm_provinces(&self) -> WarmOutcome {
        self.warm_hierarchy(provinces_lookup(), Province::from_upstream).await
    }

    pub async fn warm_cities(&self, province_id: &str) -> WarmOutcome {
        self.warm_hierarchy(cities_lookup(province_id.trim()), Region::from_upstream)
            .await
    }

    pub async fn warm_districts(&self, city_id: &str) -> WarmOutcome {
        self.warm_hierarchy(districts_lookup(city_id.trim()), Region::from_upstream)
            .await
    }

    pub async fn warm_subdistricts(&self, district_id: &str) -> WarmOutcome {
        self.warm_hierarchy(subdistricts_lookup(district_id.trim()), Region::from_upstream)
            .await
    }

    /// Stores a first-page search for `query` unless it is still fresh
    ///
    /// Prefix reuse is bypassed; the provider is asked for the exact query.
    pub async fn warm_search(&self, query: &str, limit: u32) -> WarmOutcome {
        let query = autocomplete::normalize_query(query);
        let lookup = search_lookup(&query, limit, 0);
        let transport = Arc::clone(&self.transport);
        let upstream_query = search_query(&query, limit, 0);

        self.cache
            .warm(
                &lookup.endpoint,
                &lookup.params,
                move || load_list(transport, SEARCH_ENDPOINT.to_string(), upstream_query, decode_location),
                SEARCH_TTL_SECONDS,
            )
            .await
    }

    /// All provinces
    pub async fn provinces(&self) -> Vec<Province> {
        self.hierarchy(provinces_lookup(), Province::from_upstream).await
    }

    /// Cities in a province; empty when `province_id` is blank
    pub async fn cities(&self, province_id: &str) -> Vec<Region> {
        let province_id = province_id.trim();
        if province_id.is_empty() {
            return Vec::new();
        }
        self.hierarchy(cities_lookup(province_id), Region::from_upstream).await
    }

    /// Districts in a city; empty when `city_id` is blank
    pub async fn districts(&self, city_id: &str) -> Vec<Region> {
        let city_id = city_id.trim();
        if city_id.is_empty() {
            return Vec::new();
        }
        self.hierarchy(districts_lookup(city_id), Region::from_upstream).await
    }

    /// Subdistricts in a district; empty when `district_id` is blank
    pub async fn subdistricts(&self, district_id: &str) -> Vec<Region> {
        let district_id = district_id.trim();
        if district_id.is_empty() {
            return Vec::new();
        }
        self.hierarchy(subdistricts_lookup(district_id), Region::from_upstream)
            .await
    }

    /// Free-text destination search
    ///
    /// For queries of at least three characters, a cached result for a
    /// shorter prefix is filtered locally before the provider is asked.
    pub async fn search_destinations(&self, query: &str, limit: u32, offset: u32) -> Vec<GeoLocation> {
        let query = autocomplete::normalize_query(query);
        if query.is_empty() {
            return Vec::new();
        }
        let lookup = search_lookup(&query, limit, offset);

        if autocomplete::qualifies(&query) && !self.cache.is_fresh(&lookup.endpoint, &lookup.params).await {
            if let Some(reused) =
                autocomplete::reuse_prefix(self.cache.store(), &query, limit, offset).await
            {
                return reused;
            }
        }

        let transport = Arc::clone(&self.transport);
        let upstream_query = search_query(&query, limit, offset);
        let fetcher = move || load_list(transport, SEARCH_ENDPOINT.to_string(), upstream_query, decode_location);

        self.cache
            .fetch(
                &lookup.endpoint,
                &lookup.params,
                fetcher,
                SEARCH_TTL_SECONDS,
                FetchOptions::default(),
            )
            .await
            .unwrap_or_else(|err| {
                log_failure(SEARCH_ENDPOINT, &err);
                Vec::new()
            })
    }

    /// Best match for a free-text place name
    pub async fn find_destination_by_name(&self, name: &str) -> Option<GeoLocation> {
        self.search_destinations(name, 5, 0).await.into_iter().next()
    }

    /// Derives a city-level id from a city name
    ///
    /// With `province_id`, only that province's cities are searched. Without
    /// it every province is walked in turn, which costs one lookup per
    /// province on a cold cache.
    pub async fn city_id_from_name(&self, city_name: &str, province_id: Option<&str>) -> Option<String> {
        let target = normalize_city_name(city_name);
        if target.is_empty() {
            return None;
        }

        if let Some(province_id) = province_id.map(str::trim).filter(|id| !id.is_empty()) {
            return match_city(&self.cities(province_id).await, &target);
        }

        for province in self.provinces().await {
            if let Some(city_id) = match_city(&self.cities(&province.id).await, &target) {
                debug!(city = %target, province = %province.name, "derived city id by scanning provinces");
                return Some(city_id);
            }
        }
        None
    }

    /// City id for a search hit, derived from its names when upstream left it blank
    pub async fn resolve_city_id(&self, location: &GeoLocation) -> Option<String> {
        if !location.city_id.is_empty() {
            return Some(location.city_id.clone());
        }
        let province_id = Some(location.province_id.as_str()).filter(|id| !id.is_empty());
        self.city_id_from_name(&location.city_name, province_id).await
    }
}
