//! Shipping rate resolution
//!
//! Costs are looked up for (origin, destination, weight, couriers) through
//! the shared [`FetchCache`] with a one-hour TTL and stale-while-revalidate:
//! a recent quote is shown at once while a fresh one is fetched. Provider
//! failures surface as an empty courier list, which does not mean the route
//! is unserviceable.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use super::client::{Transport, UpstreamError};
use super::{text_field, CostDetail, Courier, CourierService};
use crate::cache::{FetchCache, FetchOptions};

/// City-level cost endpoint
pub const CITY_COST_ENDPOINT: &str = "/calculate/domestic-cost";

/// District-level cost endpoint
pub const DISTRICT_COST_ENDPOINT: &str = "/calculate/district/domestic-cost";

/// Rates change often and the provider is rate limited: 1 hour
pub const RATE_TTL_SECONDS: u64 = 60 * 60;

/// Couriers the provider can quote, as (code, display name)
pub const AVAILABLE_COURIERS: &[(&str, &str)] = &[
    ("jne", "JNE"),
    ("pos", "POS Indonesia"),
    ("tiki", "TIKI"),
    ("sicepat", "SiCepat"),
    ("jnt", "J&T Express"),
    ("ninja", "Ninja Xpress"),
    ("anteraja", "AnterAja"),
    ("lion", "Lion Parcel"),
    ("ide", "ID Express"),
    ("sap", "SAP Express"),
    ("rex", "REX"),
    ("rpx", "RPX"),
    ("sentral", "Sentral Cargo"),
    ("star", "Star Cargo"),
    ("wahana", "Wahana"),
    ("dse", "DSE"),
    ("ncs", "NCS"),
];

/// Display name for a courier code, if it is in [`AVAILABLE_COURIERS`]
pub fn courier_name(code: &str) -> Option<&'static str> {
    AVAILABLE_COURIERS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
}

/// Administrative precision of the ids in a rate request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    City,
    District,
}

impl Granularity {
    /// District precision only when both ends carry a district id
    pub fn for_endpoints(origin: &RateEndpoint, destination: &RateEndpoint) -> Self {
        if origin.district_id.is_some() && destination.district_id.is_some() {
            Granularity::District
        } else {
            Granularity::City
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            Granularity::City => CITY_COST_ENDPOINT,
            Granularity::District => DISTRICT_COST_ENDPOINT,
        }
    }
}

/// Ids a caller holds for one end of a shipment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateEndpoint {
    pub city_id: String,
    pub district_id: Option<String>,
}

impl RateEndpoint {
    pub fn new(city_id: impl Into<String>, district_id: Option<String>) -> Self {
        Self {
            city_id: city_id.into(),
            district_id: district_id.filter(|id| !id.trim().is_empty()),
        }
    }

    /// The id to send at `granularity`
    pub fn id_for(&self, granularity: Granularity) -> &str {
        match (granularity, &self.district_id) {
            (Granularity::District, Some(district)) => district,
            _ => &self.city_id,
        }
    }
}

/// Provider-side ordering of returned services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PriceSort {
    Lowest,
    Highest,
}

impl PriceSort {
    pub fn as_str(self) -> &'static str {
        match self {
            PriceSort::Lowest => "lowest",
            PriceSort::Highest => "highest",
        }
    }
}

/// Errors in a caller-built rate request
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateRequestError {
    #[error("origin id is required")]
    MissingOrigin,

    #[error("destination id is required")]
    MissingDestination,

    #[error("weight must be greater than zero grams")]
    ZeroWeight,

    #[error("at least one courier code is required")]
    NoCouriers,
}

/// One shipping cost query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateRequest {
    pub origin_id: String,
    pub destination_id: String,
    pub weight_grams: u32,
    pub courier_codes: Vec<String>,
    pub granularity: Granularity,
    pub price: Option<PriceSort>,
    pub subdistrict_id: Option<String>,
    pub zip_code: Option<String>,
}

impl RateRequest {
    pub fn new(
        origin_id: impl Into<String>,
        destination_id: impl Into<String>,
        weight_grams: u32,
        courier_codes: Vec<String>,
    ) -> Self {
        Self {
            origin_id: origin_id.into(),
            destination_id: destination_id.into(),
            weight_grams,
            courier_codes,
            granularity: Granularity::City,
            price: None,
            subdistrict_id: None,
            zip_code: None,
        }
    }

    /// Builds a request from both ends, picking the granularity they share
    pub fn between(
        origin: &RateEndpoint,
        destination: &RateEndpoint,
        weight_grams: u32,
        courier_codes: Vec<String>,
    ) -> Self {
        let granularity = Granularity::for_endpoints(origin, destination);
        Self {
            granularity,
            ..Self::new(
                origin.id_for(granularity),
                destination.id_for(granularity),
                weight_grams,
                courier_codes,
            )
        }
    }

    pub fn validate(&self) -> Result<(), RateRequestError> {
        if self.origin_id.trim().is_empty() {
            return Err(RateRequestError::MissingOrigin);
        }
        if self.destination_id.trim().is_empty() {
            return Err(RateRequestError::MissingDestination);
        }
        if self.weight_grams == 0 {
            return Err(RateRequestError::ZeroWeight);
        }
        if self.courier_param().is_empty() {
            return Err(RateRequestError::NoCouriers);
        }
        Ok(())
    }

    /// Courier codes as the provider expects them: lowercase, colon-joined
    pub fn courier_param(&self) -> String {
        self.courier_codes
            .iter()
            .map(|code| code.trim().to_lowercase())
            .filter(|code| !code.is_empty())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Form body sent to the provider; optional fields only when set
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("origin".to_string(), self.origin_id.trim().to_string()),
            ("destination".to_string(), self.destination_id.trim().to_string()),
            ("weight".to_string(), self.weight_grams.to_string()),
            ("courier".to_string(), self.courier_param()),
        ];
        if let Some(price) = self.price {
            form.push(("price".to_string(), price.as_str().to_string()));
        }
        if let Some(subdistrict_id) = self.subdistrict_id.as_deref().filter(|id| !id.is_empty()) {
            form.push(("subdistrict_id".to_string(), subdistrict_id.to_string()));
        }
        if let Some(zip_code) = self.zip_code.as_deref().filter(|zip| !zip.is_empty()) {
            form.push(("zip_code".to_string(), zip_code.to_string()));
        }
        form
    }

    /// Cache params: the form fields as a JSON object
    fn cache_params(&self) -> Value {
        let fields: Map<String, Value> = self
            .form_fields()
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        Value::Object(fields)
    }
}

/// Client for the provider's cost endpoints
#[derive(Clone)]
pub struct ShippingClient {
    cache: FetchCache,
    transport: Arc<dyn Transport>,
}

impl ShippingClient {
    pub fn new(cache: FetchCache, transport: Arc<dyn Transport>) -> Self {
        Self { cache, transport }
    }

    /// Canonical courier rates for `request`
    ///
    /// Only an invalid request is an error. Missing credentials and provider
    /// failures yield an empty list.
    pub async fn calculate(&self, request: &RateRequest) -> Result<Vec<Courier>, RateRequestError> {
        request.validate()?;

        let endpoint = request.granularity.endpoint();
        let transport = Arc::clone(&self.transport);
        let form = request.form_fields();
        let fetcher = move || async move {
            let items = transport.post_form(endpoint, &form).await?;
            Ok::<Vec<Courier>, UpstreamError>(normalize_couriers(&items))
        };

        let couriers = self
            .cache
            .fetch(
                endpoint,
                &request.cache_params(),
                fetcher,
                RATE_TTL_SECONDS,
                FetchOptions::revalidating(),
            )
            .await
            .unwrap_or_else(|err| {
                if !matches!(err, UpstreamError::MissingApiKey) {
                    warn!(endpoint, error = %err, "shipping cost lookup failed; returning no couriers");
                }
                Vec::new()
            });
        Ok(couriers)
    }
}

/// Folds either provider cost shape into canonical couriers
///
/// Nested: one item per courier with a `services`/`costs`/`cost` array.
/// Flat: one item per (courier, service) row with a scalar or `{value}` cost;
/// rows are grouped by courier code in first-seen order.
pub fn normalize_couriers(items: &[Value]) -> Vec<Courier> {
    let Some(first) = items.first() else {
        return Vec::new();
    };

    if services_of(first).is_some() {
        items.iter().map(nested_courier).collect()
    } else {
        group_flat_rows(items)
    }
}

fn services_of(item: &Value) -> Option<&Vec<Value>> {
    ["services", "costs", "cost"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_array))
}

fn nested_courier(item: &Value) -> Courier {
    let costs = services_of(item)
        .map(|services| {
            services
                .iter()
                .map(|service| CourierService {
                    service: text_field(service, &["service", "name", "service_name"]),
                    description: text_field(service, &["description", "desc"]),
                    cost: service
                        .get("cost")
                        .and_then(Value::as_array)
                        .map(|costs| {
                            costs
                                .iter()
                                .map(|cost| CostDetail {
                                    value: amount_field(cost, &["value", "price"]),
                                    etd: text_field(cost, &["etd", "etd_info"]),
                                    note: text_field(cost, &["note"]),
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Courier {
        code: text_field(item, &["code", "courier_code", "courier"]),
        name: text_field(item, &["name", "courier_name"]),
        costs,
    }
}

fn group_flat_rows(items: &[Value]) -> Vec<Courier> {
    let mut couriers: Vec<Courier> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in items {
        let code = text_field(item, &["code", "courier", "courier_code"]);
        let value = match item.get("cost") {
            Some(cost @ Value::Object(_)) => amount_field(cost, &["value"]),
            Some(cost) => amount(cost),
            None => 0,
        };
        let service = CourierService {
            service: text_field(item, &["service", "service_name", "name"]),
            description: text_field(item, &["description", "desc"]),
            cost: vec![CostDetail {
                value,
                etd: text_field(item, &["etd", "etd_info"]),
                note: String::new(),
            }],
        };

        let slot = *index.entry(code.clone()).or_insert_with(|| {
            couriers.push(Courier {
                code,
                name: text_field(item, &["name", "courier_name"]),
                costs: Vec::new(),
            });
            couriers.len() - 1
        });
        couriers[slot].costs.push(service);
    }

    couriers
}

/// First non-zero amount among `keys`
fn amount_field(item: &Value, keys: &[&str]) -> u64 {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .map(amount)
        .find(|value| *value > 0)
        .unwrap_or(0)
}

/// Rupiah amount from a number or numeric string; anything else is zero
fn amount(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f.round() as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse::<f64>().map_or(0, |f| if f > 0.0 { f.round() as u64 } else { 0 }),
        _ => 0,
    }
}

/// Regular parcel service or a freight/cargo product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTier {
    Regular,
    Freight,
}

/// Decides which tier a courier service belongs to
///
/// A service is freight when its name or description contains one of
/// `keywords`, or when it is listed for its courier in `freight_services`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    pub keywords: Vec<String>,
    pub freight_services: HashMap<String, Vec<String>>,
}

impl Default for TierPolicy {
    fn default() -> Self {
        let keywords = ["CARGO", "TRUCK", "JUMBO", "BIGPACK", "JAGO"];
        let freight_services = [
            ("jne", vec!["JTR", "JTR<130", "JTR>130", "JTR>200"]),
            ("sicepat", vec!["GOKIL"]),
            ("pos", vec!["KARGO POS"]),
        ];
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            freight_services: freight_services
                .into_iter()
                .map(|(code, services)| {
                    (code.to_string(), services.into_iter().map(str::to_string).collect())
                })
                .collect(),
        }
    }
}

impl TierPolicy {
    pub fn classify(&self, courier_code: &str, service: &CourierService) -> ServiceTier {
        let name = service.service.to_uppercase();
        let description = service.description.to_uppercase();

        let keyword_hit = self
            .keywords
            .iter()
            .any(|keyword| name.contains(keyword.as_str()) || description.contains(keyword.as_str()));
        let listed = self
            .freight_services
            .get(&courier_code.to_lowercase())
            .is_some_and(|services| services.iter().any(|listed| listed.eq_ignore_ascii_case(&name)));

        if keyword_hit || listed {
            ServiceTier::Freight
        } else {
            ServiceTier::Regular
        }
    }

    /// Keeps only services of `tier`; couriers left with none are dropped
    pub fn filter(&self, couriers: &[Courier], tier: ServiceTier) -> Vec<Courier> {
        couriers
            .iter()
            .filter_map(|courier| {
                let costs: Vec<CourierService> = courier
                    .costs
                    .iter()
                    .filter(|service| self.classify(&courier.code, service) == tier)
                    .cloned()
                    .collect();
                (!costs.is_empty()).then(|| Courier {
                    code: courier.code.clone(),
                    name: courier.name.clone(),
                    costs,
                })
            })
            .collect()
    }
}
