//! Provider and warmer configuration

/// Default base URL of the RajaOngkir (Komerce) v1 API
pub const DEFAULT_BASE_URL: &str = "https://rajaongkir.komerce.id/api/v1";

/// Value shipped in sample env files; treated the same as a missing key
pub const PLACEHOLDER_API_KEY: &str = "your_rajaongkir_api_key_here";

/// Environment variable holding the provider API key
pub const API_KEY_ENV: &str = "RAJAONGKIR_API_KEY";

/// Environment variable overriding the provider base URL
pub const BASE_URL_ENV: &str = "RAJAONGKIR_BASE_URL";

/// Connection settings for the upstream geography/rate provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl ProviderConfig {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url
                .filter(|url| !url.trim().is_empty())
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Reads `RAJAONGKIR_API_KEY` and `RAJAONGKIR_BASE_URL`
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(API_KEY_ENV).ok(),
            std::env::var(BASE_URL_ENV).ok(),
        )
    }

    /// The API key, unless it is missing, blank or the sample placeholder
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != PLACEHOLDER_API_KEY)
    }
}

/// What the cache warmer pre-populates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmerConfig {
    /// Provinces whose city lists are warmed
    pub popular_province_ids: Vec<String>,
    /// City names warmed as destination searches
    pub popular_searches: Vec<String>,
    /// Shipping origin whose districts and subdistricts are warmed
    pub origin_city_id: Option<String>,
    /// Page size used for warmed searches
    pub search_limit: u32,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        // DKI Jakarta, Jawa Barat, Jawa Tengah, DI Yogyakarta, Jawa Timur, Bali,
        // Kepulauan Riau, Banten, Sumatera Utara, Sulawesi Selatan
        let provinces = ["6", "9", "10", "11", "12", "1", "21", "5", "23", "26"];
        let searches = [
            "Jakarta",
            "Surabaya",
            "Bandung",
            "Medan",
            "Semarang",
            "Makassar",
            "Palembang",
            "Tangerang",
            "Depok",
            "Bekasi",
            "Bogor",
            "Yogyakarta",
            "Malang",
            "Denpasar",
            "Batam",
        ];
        Self {
            popular_province_ids: provinces.iter().map(|id| id.to_string()).collect(),
            popular_searches: searches.iter().map(|city| city.to_string()).collect(),
            origin_city_id: None,
            search_limit: 10,
        }
    }
}
