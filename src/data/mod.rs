//! Canonical data models for geography and shipping rates
//!
//! The upstream provider returns several shapes for the same concepts
//! (numeric vs string ids, legacy field names, nested vs flat cost rows).
//! Everything is folded into the types below before it reaches callers.

pub mod autocomplete;
pub mod client;
pub mod geo;
pub mod shipping;
pub mod warmer;

pub use client::{Envelope, HttpTransport, Meta, Transport, UpstreamError};
pub use geo::GeoClient;
pub use shipping::{
    Granularity, PriceSort, RateEndpoint, RateRequest, RateRequestError, ServiceTier,
    ShippingClient, TierPolicy,
};
pub use warmer::{CacheWarmer, PreloadError, PreloadSummary, WarmReport};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A province from the hierarchy endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Province {
    pub id: String,
    pub name: String,
}

impl Province {
    /// Normalizes one raw province item; `None` if it has no id
    pub fn from_upstream(item: &Value) -> Option<Self> {
        let id = id_field(item, &["id", "province_id"]);
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id,
            name: text_field(item, &["name", "province"]),
        })
    }
}

/// A city, district or subdistrict from the hierarchy endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub zip_code: String,
}

impl Region {
    /// Normalizes one raw hierarchy item; `None` if it has no id
    pub fn from_upstream(item: &Value) -> Option<Self> {
        let id = id_field(item, &["id", "city_id", "district_id", "subdistrict_id"]);
        if id.is_empty() {
            return None;
        }
        Some(Self {
            id,
            name: text_field(item, &["name", "city_name", "district_name", "subdistrict_name"]),
            zip_code: id_field(item, &["zip_code", "postal_code"]),
        })
    }
}

/// A destination returned by free-text search
///
/// `id` is the finest-grained (subdistrict) identifier. `city_id` is often
/// blank upstream; see [`GeoClient::resolve_city_id`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub id: String,
    pub label: String,
    pub province_id: String,
    pub province_name: String,
    pub city_id: String,
    pub city_name: String,
    pub district_id: String,
    pub district_name: String,
    pub subdistrict_id: String,
    pub subdistrict_name: String,
    pub zip_code: String,
}

impl GeoLocation {
    /// Normalizes one raw search item, accepting legacy field names
    pub fn from_upstream(item: &Value) -> Self {
        let id = id_field(item, &["id"]);
        let label = text_field(item, &["label", "name"]);
        Self {
            subdistrict_id: id.clone(),
            id,
            label,
            province_id: id_field(item, &["province_id"]),
            province_name: text_field(item, &["province_name", "province"]),
            city_id: id_field(item, &["city_id"]),
            city_name: text_field(item, &["city_name", "city"]),
            district_id: id_field(item, &["district_id"]),
            district_name: text_field(item, &["district_name", "district"]),
            subdistrict_name: text_field(item, &["subdistrict_name", "subdistrict"]),
            zip_code: text_field(item, &["zip_code", "postal_code"]),
        }
    }

    /// Name shown in autocomplete lists
    pub fn display_name(&self) -> &str {
        &self.label
    }
}

/// One cost option for a courier service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostDetail {
    pub value: u64,
    pub etd: String,
    pub note: String,
}

/// A courier service (e.g. "REG", "YES") and its costs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourierService {
    pub service: String,
    pub description: String,
    pub cost: Vec<CostDetail>,
}

/// Canonical per-courier rate result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Courier {
    pub code: String,
    pub name: String,
    pub costs: Vec<CourierService>,
}

/// One flattened (courier, service) quote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub courier_code: String,
    pub courier_name: String,
    pub service: String,
    pub service_description: String,
    pub cost_value: u64,
    pub etd: String,
    pub note: String,
}

impl ShippingQuote {
    /// Flattens couriers into one quote per service, using each service's first cost
    pub fn from_couriers(couriers: &[Courier]) -> Vec<Self> {
        couriers
            .iter()
            .flat_map(|courier| {
                courier.costs.iter().filter_map(move |service| {
                    let cost = service.cost.first()?;
                    Some(Self {
                        courier_code: courier.code.clone(),
                        courier_name: courier.name.clone(),
                        service: service.service.clone(),
                        service_description: service.description.clone(),
                        cost_value: cost.value,
                        etd: cost.etd.clone(),
                        note: cost.note.clone(),
                    })
                })
            })
            .collect()
    }
}

/// Renders an id that may arrive as a number or a string
pub(crate) fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty id among `keys`, or an empty string
pub(crate) fn id_field(item: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| item.get(*key).and_then(id_text))
        .unwrap_or_default()
}

/// First non-empty string among `keys`, or an empty string
pub(crate) fn text_field(item: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| {
            item.get(*key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_province_accepts_numeric_and_legacy_ids() {
        let current = Province::from_upstream(&json!({"id": 6, "name": "DKI Jakarta"})).unwrap();
        let legacy =
            Province::from_upstream(&json!({"province_id": "6", "province": "DKI Jakarta"})).unwrap();

        assert_eq!(current, legacy);
        assert_eq!(current.id, "6");
    }

    #[test]
    fn test_region_zip_code_optional() {
        let with_zip =
            Region::from_upstream(&json!({"id": 152, "name": "Jakarta Pusat", "zip_code": "10540"})).unwrap();
        let without = Region::from_upstream(&json!({"id": 17, "name": "Badung"})).unwrap();
        let legacy = Region::from_upstream(&json!({"city_id": "17", "city_name": "Badung", "postal_code": 80351})).unwrap();

        assert_eq!(with_zip.zip_code, "10540");
        assert_eq!(without.zip_code, "");
        assert_eq!(legacy.id, "17");
        assert_eq!(legacy.zip_code, "80351");
    }

    #[test]
    fn test_region_rejects_missing_id() {
        assert!(Region::from_upstream(&json!({"id": null, "name": "X"})).is_none());
        assert!(Province::from_upstream(&json!({"name": "X"})).is_none());
    }

    #[test]
    fn test_geo_location_from_upstream_search_item() {
        let item = json!({
            "id": 17485,
            "label": "GAMBIR, GAMBIR, JAKARTA PUSAT, DKI JAKARTA, 10110",
            "province_name": "DKI JAKARTA",
            "city_name": "JAKARTA PUSAT",
            "city_id": "",
            "district_name": "GAMBIR",
            "subdistrict_name": "GAMBIR",
            "zip_code": "10110"
        });

        let location = GeoLocation::from_upstream(&item);

        assert_eq!(location.id, "17485");
        assert_eq!(location.subdistrict_id, "17485");
        assert_eq!(location.city_id, "");
        assert_eq!(location.city_name, "JAKARTA PUSAT");
        assert_eq!(location.zip_code, "10110");
    }

    #[test]
    fn test_geo_location_legacy_fields() {
        let item = json!({"id": "9", "name": "Bandung", "city": "BANDUNG", "postal_code": "40111"});

        let location = GeoLocation::from_upstream(&item);

        assert_eq!(location.label, "Bandung");
        assert_eq!(location.city_name, "BANDUNG");
        assert_eq!(location.zip_code, "40111");
    }

    #[test]
    fn test_quotes_flatten_first_cost_per_service() {
        let couriers = vec![Courier {
            code: "jne".into(),
            name: "JNE".into(),
            costs: vec![
                CourierService {
                    service: "REG".into(),
                    description: "Layanan Reguler".into(),
                    cost: vec![CostDetail { value: 9000, etd: "2-3".into(), note: String::new() }],
                },
                CourierService {
                    service: "EMPTY".into(),
                    description: String::new(),
                    cost: vec![],
                },
            ],
        }];

        let quotes = ShippingQuote::from_couriers(&couriers);

        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].courier_code, "jne");
        assert_eq!(quotes[0].cost_value, 9000);
    }
}
