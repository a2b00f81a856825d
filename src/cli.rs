//! Command-line interface parsing for the ongkir CLI
//!
//! Arguments are parsed with clap and checked before any cache or network
//! access, so a bad query or rate request fails fast with a clear message.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use thiserror::Error;

use crate::config::{API_KEY_ENV, BASE_URL_ENV};
use crate::data::autocomplete;
use crate::data::shipping::{
    PriceSort, RateEndpoint, RateRequest, RateRequestError, ServiceTier,
};
use crate::data::warmer::{validate_preload, PreloadError, DEFAULT_PRELOAD_THROTTLE};

/// Default age after which `purge` removes entries
pub const DEFAULT_PURGE_DAYS: u32 = 60;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// Search queries shorter than the autocomplete minimum are not sent
    #[error("search query '{0}' is too short; type at least 3 characters")]
    QueryTooShort(String),

    #[error("invalid rate request: {0}")]
    InvalidRate(#[from] RateRequestError),

    #[error("invalid preload options: {0}")]
    InvalidPreload(#[from] PreloadError),

    /// `warm origin` needs a city id from the flag or the config
    #[error("no origin city given; pass --origin-city")]
    MissingOriginCity,

    #[error("endpoint must start with '/' (got '{0}')")]
    InvalidEndpoint(String),
}

/// ongkir - cached Indonesian geography lookup and shipping rates
#[derive(Parser, Debug)]
#[command(name = "ongkir")]
#[command(about = "Cached Indonesian geography lookup and multi-courier shipping rates")]
#[command(version)]
pub struct Cli {
    /// Provider API key
    #[arg(long, global = true, env = API_KEY_ENV, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Provider base URL
    #[arg(long, global = true, env = BASE_URL_ENV)]
    pub base_url: Option<String>,

    /// Directory for the on-disk cache (defaults to the platform cache dir)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Keep the cache in memory only for this run
    #[arg(long, global = true)]
    pub memory_only: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List all provinces
    Provinces,

    /// List the cities of a province
    Cities { province_id: String },

    /// List the districts of a city
    Districts { city_id: String },

    /// List the subdistricts of a district
    Subdistricts { district_id: String },

    /// Free-text destination search
    ///
    /// Examples:
    ///   ongkir search gambir
    ///   ongkir search "jakarta pusat" --limit 5
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Derive a city id from a city name
    CityId {
        name: String,
        /// Only search this province's cities
        #[arg(long)]
        province: Option<String>,
    },

    /// Shipping costs between two places
    Cost(CostArgs),

    /// List the couriers the provider can quote
    Couriers,

    /// Pre-populate the cache with commonly requested lookups
    Warm {
        #[arg(value_enum, default_value_t = WarmTarget::All)]
        target: WarmTarget,
        /// Origin city whose districts and subdistricts are warmed
        #[arg(long)]
        origin_city: Option<String>,
    },

    /// Walk the whole province/city/district/subdistrict hierarchy
    Preload {
        /// 1: provinces and cities, 2: plus districts, 3: plus subdistricts
        #[arg(long, default_value_t = 3)]
        depth: u8,
        /// Delay between provider requests (0-5000 ms)
        #[arg(long, default_value_t = DEFAULT_PRELOAD_THROTTLE.as_millis() as u64)]
        throttle_ms: u64,
    },

    /// Remove every cached entry for an endpoint, e.g. /destination/province
    Clear { endpoint: String },

    /// Remove cached entries last written more than N days ago
    Purge {
        #[arg(long, default_value_t = DEFAULT_PURGE_DAYS)]
        days: u32,
    },

    /// Show what the cache holds
    Stats,
}

#[derive(Args, Debug, Clone)]
pub struct CostArgs {
    /// Origin city id
    #[arg(long)]
    pub origin: String,

    /// Destination city id
    #[arg(long)]
    pub destination: String,

    /// Origin district id; district rates are used when both ends have one
    #[arg(long)]
    pub origin_district: Option<String>,

    /// Destination district id
    #[arg(long)]
    pub destination_district: Option<String>,

    /// Parcel weight in grams
    #[arg(long)]
    pub weight: u32,

    /// Courier codes separated by ':' or ','
    #[arg(long, default_value = "jne:sicepat:tiki:pos")]
    pub courier: String,

    #[arg(long, value_enum)]
    pub price: Option<PriceSort>,

    #[arg(long)]
    pub subdistrict_id: Option<String>,

    #[arg(long)]
    pub zip_code: Option<String>,

    /// Only show services of this tier
    #[arg(long, value_enum)]
    pub tier: Option<ServiceTier>,

    /// Print one flat row per courier service instead of grouped couriers
    #[arg(long)]
    pub flat: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmTarget {
    /// Provinces, popular cities, popular searches and the origin
    All,
    /// Cities of the popular provinces
    Popular,
    /// Popular destination searches
    Searches,
    /// Districts and subdistricts of the origin city
    Origin,
}

/// Splits a courier list on ':' or ','
pub fn parse_courier_list(s: &str) -> Vec<String> {
    s.split([':', ','])
        .map(|code| code.trim().to_lowercase())
        .filter(|code| !code.is_empty())
        .collect()
}

impl CostArgs {
    /// Builds and validates the rate request these arguments describe
    pub fn rate_request(&self) -> Result<RateRequest, CliError> {
        let origin = RateEndpoint::new(self.origin.trim(), self.origin_district.clone());
        let destination = RateEndpoint::new(self.destination.trim(), self.destination_district.clone());

        let mut request = RateRequest::between(
            &origin,
            &destination,
            self.weight,
            parse_courier_list(&self.courier),
        );
        request.price = self.price;
        request.subdistrict_id = self.subdistrict_id.clone();
        request.zip_code = self.zip_code.clone();

        request.validate()?;
        Ok(request)
    }
}

impl Cli {
    /// Checks arguments that can be rejected without any I/O
    pub fn validate(&self) -> Result<(), CliError> {
        match &self.command {
            Command::Search { query, .. } => {
                if !autocomplete::qualifies(&autocomplete::normalize_query(query)) {
                    return Err(CliError::QueryTooShort(query.clone()));
                }
            }
            Command::Cost(args) => {
                args.rate_request()?;
            }
            Command::Preload { depth, throttle_ms } => {
                validate_preload(*depth, Duration::from_millis(*throttle_ms))?;
            }
            Command::Warm {
                target: WarmTarget::Origin,
                origin_city,
            } if origin_city.as_deref().map_or(true, |id| id.trim().is_empty()) => {
                return Err(CliError::MissingOriginCity);
            }
            Command::Clear { endpoint } => {
                if !endpoint.starts_with('/') {
                    return Err(CliError::InvalidEndpoint(endpoint.clone()));
                }
            }
            _ => {}
        }
        Ok(())
    }
}
