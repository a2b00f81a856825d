//! Cache warming and hierarchy preload
//!
//! Warming goes through [`GeoClient`]'s warm methods, which share their cache
//! keys with the live lookups. An entry only counts as warmed when the
//! provider actually answered; a failure leaves any stale entry in place and
//! is counted as failed.

use std::iter::Sum;
use std::ops::Add;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::GeoClient;
use crate::cache::WarmOutcome;
use crate::config::WarmerConfig;

/// Deepest level [`CacheWarmer::preload`] walks to
pub const MAX_PRELOAD_DEPTH: u8 = 3;

/// Largest accepted delay between preload requests
pub const MAX_PRELOAD_THROTTLE: Duration = Duration::from_millis(5000);

/// Delay between preload requests when none is given
pub const DEFAULT_PRELOAD_THROTTLE: Duration = Duration::from_millis(200);

/// Tally of one warming run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    /// Entries fetched and stored
    pub warmed: usize,
    /// Entries already fresh
    pub skipped: usize,
    /// Entries the provider failed to refresh
    pub failed: usize,
}

impl From<WarmOutcome> for WarmReport {
    fn from(outcome: WarmOutcome) -> Self {
        let mut report = WarmReport::default();
        match outcome {
            WarmOutcome::Warmed => report.warmed = 1,
            WarmOutcome::Skipped => report.skipped = 1,
            WarmOutcome::Failed => report.failed = 1,
        }
        report
    }
}

impl Add for WarmReport {
    type Output = WarmReport;

    fn add(self, other: WarmReport) -> WarmReport {
        WarmReport {
            warmed: self.warmed + other.warmed,
            skipped: self.skipped + other.skipped,
            failed: self.failed + other.failed,
        }
    }
}

impl Sum for WarmReport {
    fn sum<I: Iterator<Item = WarmReport>>(iter: I) -> WarmReport {
        iter.fold(WarmReport::default(), Add::add)
    }
}

/// Item counts seen while preloading the hierarchy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadSummary {
    pub provinces: usize,
    pub cities: usize,
    pub districts: usize,
    pub subdistricts: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreloadError {
    #[error("depth must be 1, 2 or 3 (got {0})")]
    InvalidDepth(u8),

    #[error("throttle must be between 0 and 5000 ms (got {0} ms)")]
    InvalidThrottle(u128),
}

/// Pre-populates the cache with commonly requested geography
#[derive(Clone)]
pub struct CacheWarmer {
    geo: GeoClient,
    config: WarmerConfig,
}

impl CacheWarmer {
    pub fn new(geo: GeoClient, config: WarmerConfig) -> Self {
        Self { geo, config }
    }

    pub async fn warm_provinces(&self) -> WarmReport {
        let report = WarmReport::from(self.geo.warm_provinces().await);
        info!(?report, "provinces warmed");
        report
    }

    /// Cities of each given province, warmed concurrently
    pub async fn warm_cities_for_provinces(&self, province_ids: &[String]) -> WarmReport {
        let tasks = province_ids.iter().map(|id| self.geo.warm_cities(id));
        let report: WarmReport = join_all(tasks).await.into_iter().map(WarmReport::from).sum();
        info!(provinces = province_ids.len(), ?report, "cities warmed");
        report
    }

    pub async fn warm_popular_cities(&self) -> WarmReport {
        self.warm_cities_for_provinces(&self.config.popular_province_ids)
            .await
    }

    /// Destination searches for the configured popular city names
    pub async fn warm_popular_searches(&self) -> WarmReport {
        let limit = self.config.search_limit;
        let tasks = self
            .config
            .popular_searches
            .iter()
            .map(|city| self.geo.warm_search(city, limit));
        let report: WarmReport = join_all(tasks).await.into_iter().map(WarmReport::from).sum();
        info!(searches = self.config.popular_searches.len(), ?report, "popular searches warmed");
        report
    }

    /// Districts of the origin city and the subdistricts under each
    pub async fn warm_origin(&self, city_id: &str) -> WarmReport {
        let city_id = city_id.trim();
        if city_id.is_empty() {
            info!("no origin city configured; skipping origin warming");
            return WarmReport::default();
        }

        let districts_report = WarmReport::from(self.geo.warm_districts(city_id).await);
        let districts = self.geo.districts(city_id).await;
        let tasks = districts
            .iter()
            .map(|district| self.geo.warm_subdistricts(&district.id));
        let report = districts_report
            + join_all(tasks)
                .await
                .into_iter()
                .map(WarmReport::from)
                .sum::<WarmReport>();
        info!(city_id, districts = districts.len(), ?report, "origin warmed");
        report
    }

    /// Provinces, popular cities, popular searches and the configured origin
    pub async fn warm_essential(&self) -> WarmReport {
        let started = Instant::now();
        info!("cache warming started");

        let mut report = self.warm_provinces().await;
        report = report + self.warm_popular_cities().await;
        report = report + self.warm_popular_searches().await;
        if let Some(origin) = self.config.origin_city_id.as_deref() {
            report = report + self.warm_origin(origin).await;
        }

        if report.failed > 0 {
            warn!(failed = report.failed, "some entries could not be refreshed; stale copies kept");
        }
        info!(elapsed = ?started.elapsed(), ?report, "cache warming completed");
        report
    }

    /// Walks the whole hierarchy one request at a time
    ///
    /// Depth 1 loads provinces and their cities, 2 adds districts, 3 adds
    /// subdistricts. `throttle` is slept after every city, district and
    /// subdistrict lookup to stay under the provider's rate limit.
    pub async fn preload(&self, depth: u8, throttle: Duration) -> Result<PreloadSummary, PreloadError> {
        validate_preload(depth, throttle)?;

        let started = Instant::now();
        let provinces = self.geo.provinces().await;
        let mut summary = PreloadSummary {
            provinces: provinces.len(),
            ..PreloadSummary::default()
        };

        for province in &provinces {
            let cities = self.geo.cities(&province.id).await;
            summary.cities += cities.len();
            pause(throttle).await;

            if depth < 2 {
                continue;
            }
            for city in &cities {
                let districts = self.geo.districts(&city.id).await;
                summary.districts += districts.len();
                pause(throttle).await;

                if depth < 3 {
                    continue;
                }
                for district in &districts {
                    summary.subdistricts += self.geo.subdistricts(&district.id).await.len();
                    pause(throttle).await;
                }
            }
        }

        info!(depth, ?summary, elapsed = ?started.elapsed(), "preload complete");
        Ok(summary)
    }
}

/// Checks preload arguments without touching the cache or the provider
pub fn validate_preload(depth: u8, throttle: Duration) -> Result<(), PreloadError> {
    if !(1..=MAX_PRELOAD_DEPTH).contains(&depth) {
        return Err(PreloadError::InvalidDepth(depth));
    }
    if throttle > MAX_PRELOAD_THROTTLE {
        return Err(PreloadError::InvalidThrottle(throttle.as_millis()));
    }
    Ok(())
}

async fn pause(throttle: Duration) {
    if !throttle.is_zero() {
        tokio::time::sleep(throttle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{compute_key, CacheEntry, CacheStore, DurableStore, FetchCache, MemoryStore};
    use crate::data::client::testing::ScriptedTransport;
    use crate::data::geo::{cities_lookup, SEARCH_ENDPOINT};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;

    fn warmer_with(transport: Arc<ScriptedTransport>, config: WarmerConfig) -> CacheWarmer {
        let cache = FetchCache::new(CacheStore::new(Arc::new(MemoryStore::new())));
        CacheWarmer::new(GeoClient::new(cache, transport), config)
    }

    fn scripted_hierarchy() -> Arc<ScriptedTransport> {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply("/destination/province", json!([{"id": 6, "name": "DKI JAKARTA"}]));
        transport.reply("/destination/city/6", json!([
            {"id": 152, "name": "JAKARTA PUSAT"},
            {"id": 155, "name": "JAKARTA TIMUR"}
        ]));
        transport.reply("/destination/district/152", json!([{"id": 1330, "name": "GAMBIR"}]));
        transport.reply("/destination/district/155", json!([
            {"id": 1340, "name": "CAKUNG"},
            {"id": 1341, "name": "DUREN SAWIT"}
        ]));
        transport.reply("/destination/sub-district/1330", json!([{"id": 17485, "name": "GAMBIR"}]));
        transport.reply("/destination/sub-district/1340", json!([{"id": 17500, "name": "CAKUNG BARAT"}]));
        transport.reply("/destination/sub-district/1341", json!([]));
        transport
    }

    fn config(provinces: &[&str], searches: &[&str]) -> WarmerConfig {
        WarmerConfig {
            popular_province_ids: provinces.iter().map(|id| id.to_string()).collect(),
            popular_searches: searches.iter().map(|s| s.to_string()).collect(),
            ..WarmerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_second_warm_skips_fresh_entries() {
        let transport = scripted_hierarchy();
        let warmer = warmer_with(transport.clone(), config(&["6"], &[]));

        let first = warmer.warm_popular_cities().await;
        let second = warmer.warm_popular_cities().await;

        assert_eq!(first, WarmReport { warmed: 1, skipped: 0, failed: 0 });
        assert_eq!(second, WarmReport { warmed: 0, skipped: 1, failed: 0 });
        assert_eq!(transport.calls_to("/destination/city/6"), 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_batch() {
        let transport = scripted_hierarchy();
        transport.fail("/destination/city/9", "Data not found");
        let warmer = warmer_with(transport, config(&["6", "9"], &[]));

        let report = warmer.warm_popular_cities().await;

        assert_eq!(report, WarmReport { warmed: 1, skipped: 0, failed: 1 });
    }

    #[tokio::test]
    async fn test_failed_refresh_of_stale_entry_counts_as_failed() {
        let backend = Arc::new(MemoryStore::new());
        let lookup = cities_lookup("6");
        let mut stale = CacheEntry::new(
            compute_key(&lookup.endpoint, &lookup.params),
            &lookup.endpoint,
            &lookup.params,
            json!([{"id": "152", "name": "JAKARTA PUSAT", "zip_code": ""}]),
            60,
        );
        stale.updated_at = Utc::now() - chrono::Duration::hours(2);
        backend.upsert(&stale).await.unwrap();

        let transport = Arc::new(ScriptedTransport::new());
        transport.fail("/destination/city/6", "upstream down");
        let cache = FetchCache::new(CacheStore::new(backend));
        let warmer = CacheWarmer::new(GeoClient::new(cache.clone(), transport), config(&["6"], &[]));

        let report = warmer.warm_popular_cities().await;

        assert_eq!(report, WarmReport { warmed: 0, skipped: 0, failed: 1 });
        assert!(!cache.is_fresh(&lookup.endpoint, &lookup.params).await);
        // The stale list is still there for live lookups.
        assert_eq!(warmer.geo.cities("6").await.len(), 1);
    }

    #[tokio::test]
    async fn test_warmed_searches_serve_live_lookups() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.reply(SEARCH_ENDPOINT, json!([{"id": 1, "label": "BANDUNG"}]));
        let warmer = warmer_with(transport.clone(), config(&[], &["Bandung"]));

        let report = warmer.warm_popular_searches().await;
        let hits = warmer.geo.search_destinations("bandung", 10, 0).await;

        assert_eq!(report.warmed, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_warm_origin_covers_districts_and_subdistricts() {
        let transport = scripted_hierarchy();
        let warmer = warmer_with(transport.clone(), config(&[], &[]));

        let report = warmer.warm_origin("155").await;

        // sub-district/1341 is empty upstream, which is still a stored answer
        assert_eq!(report, WarmReport { warmed: 3, skipped: 0, failed: 0 });
        assert_eq!(transport.calls_to("/destination/district/155"), 1);
        assert_eq!(warmer.warm_origin("  ").await, WarmReport::default());
    }

    #[tokio::test]
    async fn test_warm_essential_includes_configured_origin() {
        let transport = scripted_hierarchy();
        let mut cfg = config(&["6"], &[]);
        cfg.origin_city_id = Some("152".into());
        let warmer = warmer_with(transport, cfg);

        let report = warmer.warm_essential().await;

        // provinces + cities/6 + districts/152 + sub-district/1330
        assert_eq!(report.warmed, 4);
    }

    #[tokio::test]
    async fn test_preload_counts_each_level() {
        let warmer = warmer_with(scripted_hierarchy(), config(&[], &[]));

        let shallow = warmer.preload(1, Duration::ZERO).await.unwrap();
        let full = warmer.preload(3, Duration::ZERO).await.unwrap();

        assert_eq!(shallow, PreloadSummary { provinces: 1, cities: 2, districts: 0, subdistricts: 0 });
        assert_eq!(full, PreloadSummary { provinces: 1, cities: 2, districts: 3, subdistricts: 2 });
    }

    #[tokio::test]
    async fn test_preload_rejects_bad_arguments() {
        let transport = scripted_hierarchy();
        let warmer = warmer_with(transport.clone(), config(&[], &[]));

        assert_eq!(warmer.preload(0, Duration::ZERO).await, Err(PreloadError::InvalidDepth(0)));
        assert_eq!(warmer.preload(4, Duration::ZERO).await, Err(PreloadError::InvalidDepth(4)));
        assert_eq!(
            warmer.preload(2, Duration::from_millis(5001)).await,
            Err(PreloadError::InvalidThrottle(5001))
        );
        assert_eq!(transport.call_count(), 0);
    }
}
