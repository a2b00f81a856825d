//! ongkir - Indonesian geography lookup and shipping rates from the terminal
//!
//! Every lookup goes through the on-disk cache, so repeated commands are
//! answered without calling the provider. Results are printed as JSON on
//! stdout; logs go to stderr.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use ongkir::cache::{CacheStore, FetchCache, FileStore};
use ongkir::cli::{Cli, Command, CostArgs, WarmTarget};
use ongkir::config::{ProviderConfig, WarmerConfig};
use ongkir::data::shipping::AVAILABLE_COURIERS;
use ongkir::data::{
    CacheWarmer, GeoClient, HttpTransport, ShippingClient, ShippingQuote, TierPolicy, Transport,
};

/// Installs the stderr log subscriber; `RUST_LOG` overrides the default level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ongkir=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Builds the process-wide cache: on disk unless disabled or unavailable
fn build_cache(cli: &Cli) -> FetchCache {
    if cli.memory_only {
        return FetchCache::new(CacheStore::memory_only());
    }

    let file_store = match &cli.cache_dir {
        Some(dir) => Some(FileStore::with_dir(dir.clone())),
        None => FileStore::new(),
    };
    match file_store {
        Some(store) => FetchCache::new(CacheStore::new(Arc::new(store))),
        None => {
            warn!("no cache directory available; caching in memory for this run");
            FetchCache::new(CacheStore::memory_only())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_cost(shipping: &ShippingClient, args: &CostArgs) -> Result<(), Box<dyn Error>> {
    let request = args.rate_request()?;
    let mut couriers = shipping.calculate(&request).await?;
    if let Some(tier) = args.tier {
        couriers = TierPolicy::default().filter(&couriers, tier);
    }

    if args.flat {
        print_json(&ShippingQuote::from_couriers(&couriers))
    } else {
        print_json(&couriers)
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    cli.validate()?;

    let cache = build_cache(&cli);
    let provider = ProviderConfig::new(cli.api_key.clone(), cli.base_url.clone());
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(provider));
    let geo = GeoClient::new(cache.clone(), Arc::clone(&transport));

    let outcome = match &cli.command {
        Command::Provinces => print_json(&geo.provinces().await),
        Command::Cities { province_id } => print_json(&geo.cities(province_id).await),
        Command::Districts { city_id } => print_json(&geo.districts(city_id).await),
        Command::Subdistricts { district_id } => print_json(&geo.subdistricts(district_id).await),
        Command::Search { query, limit, offset } => {
            print_json(&geo.search_destinations(query, *limit, *offset).await)
        }
        Command::CityId { name, province } => {
            let city_id = geo.city_id_from_name(name, province.as_deref()).await;
            print_json(&json!({ "name": name, "city_id": city_id }))
        }
        Command::Cost(args) => {
            let shipping = ShippingClient::new(cache.clone(), Arc::clone(&transport));
            run_cost(&shipping, args).await
        }
        Command::Couriers => {
            let couriers: Vec<_> = AVAILABLE_COURIERS
                .iter()
                .map(|(code, name)| json!({ "code": code, "name": name }))
                .collect();
            print_json(&couriers)
        }
        Command::Warm { target, origin_city } => {
            let config = WarmerConfig {
                origin_city_id: origin_city.clone(),
                ..WarmerConfig::default()
            };
            let warmer = CacheWarmer::new(geo, config);
            let report = match target {
                WarmTarget::All => warmer.warm_essential().await,
                WarmTarget::Popular => warmer.warm_popular_cities().await,
                WarmTarget::Searches => warmer.warm_popular_searches().await,
                WarmTarget::Origin => {
                    let origin = origin_city.as_deref().unwrap_or_default();
                    warmer.warm_origin(origin).await
                }
            };
            print_json(&report)
        }
        Command::Preload { depth, throttle_ms } => {
            let warmer = CacheWarmer::new(geo, WarmerConfig::default());
            let summary = warmer
                .preload(*depth, Duration::from_millis(*throttle_ms))
                .await?;
            print_json(&summary)
        }
        Command::Clear { endpoint } => {
            cache.clear_by_endpoint(endpoint).await;
            print_json(&json!({ "cleared": endpoint }))
        }
        Command::Purge { days } => {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(*days));
            let removed = cache.store().purge_older_than(cutoff).await;
            print_json(&json!({ "removed": removed, "cutoff": cutoff }))
        }
        Command::Stats => print_json(&cache.store().stats().await),
    };

    // Stale answers are already printed; let their refreshes land on disk.
    let refreshed = cache.drain_revalidations().await;
    if refreshed > 0 {
        debug!(refreshed, "background revalidations finished");
    }
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
