use dotenvy::dotenv;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::backends::SearchServiceEndpoint;
use crate::circuit_breaker::CircuitBreakerConfig;

pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    dotenv().ok(); // Load .env file if present
    AppConfig {
        search_base_url: get_env_or_default("SEARCH_BASE_URL", "http://localhost:7700"),
        search_app_id: get_env_opt("SEARCH_APP_ID"),
        search_api_key: get_env_opt("SEARCH_API_KEY"),
        products_index: get_env_or_default("PRODUCTS_INDEX", "products"),
        merchant_products_index: get_env_or_default("MERCHANT_PRODUCTS_INDEX", "shop_products"),
        merchants_index: get_env_or_default("MERCHANTS_INDEX", "shops"),
        categories_index: get_env_or_default("CATEGORIES_INDEX", "categories"),
        mongo_uri: get_env_opt("MONGO_URI"),
        mongo_db_name: get_env_or_default("MONGO_DB_NAME", "marketplace"),
        bind_addr: get_env_or_default("BIND_ADDR", "0.0.0.0:3000"),
        search: SearchConfig::from_env(),
    }
});

pub struct AppConfig {
    pub search_base_url: String,
    pub search_app_id: Option<String>,
    pub search_api_key: Option<String>,
    pub products_index: String,
    pub merchant_products_index: String,
    pub merchants_index: String,
    pub categories_index: String,
    pub mongo_uri: Option<String>,
    pub mongo_db_name: String,
    pub bind_addr: String,
    pub search: SearchConfig,
}

impl AppConfig {
    pub fn search_endpoint(&self) -> SearchServiceEndpoint {
        SearchServiceEndpoint {
            base_url: self.search_base_url.clone(),
            app_id: self.search_app_id.clone(),
            api_key: self.search_api_key.clone(),
            timeout: self.search.request_timeout(),
        }
    }
}

/// Where product suggestions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductMode {
    /// The two hosted product indexes.
    #[default]
    Primary,
    /// Prefix scans against the document store, no pagination.
    DocumentStore,
}

impl FromStr for ProductMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" => Ok(ProductMode::Primary),
            "document_store" | "fallback" => Ok(ProductMode::DocumentStore),
            other => Err(format!("unknown product mode: {other}")),
        }
    }
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_initial_page_size() -> u32 {
    10
}

fn default_page_increment() -> u32 {
    5
}

fn default_max_products() -> usize {
    20
}

fn default_category_candidates() -> u32 {
    20
}

fn default_category_limit() -> usize {
    5
}

fn default_merchant_limit() -> u32 {
    5
}

fn default_cache_ttl_ms() -> u64 {
    120_000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cool_down_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    8_000
}

/// Tuning for the search engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub product_mode: ProductMode,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Products requested for the first page of a query.
    #[serde(default = "default_initial_page_size")]
    pub initial_page_size: u32,

    /// Products requested per `load_more`.
    #[serde(default = "default_page_increment")]
    pub page_increment: u32,

    /// Hard cap on accumulated products per query session.
    #[serde(default = "default_max_products")]
    pub max_products: usize,

    /// Category hits fetched before ranking.
    #[serde(default = "default_category_candidates")]
    pub category_candidates: u32,

    /// Categories kept after ranking.
    #[serde(default = "default_category_limit")]
    pub category_limit: usize,

    #[serde(default = "default_merchant_limit")]
    pub merchant_limit: u32,

    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Per-namespace entry cap, unbounded when unset.
    #[serde(default)]
    pub cache_max_entries: Option<usize>,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cool_down_ms")]
    pub cool_down_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            product_mode: ProductMode::default(),
            debounce_ms: default_debounce_ms(),
            initial_page_size: default_initial_page_size(),
            page_increment: default_page_increment(),
            max_products: default_max_products(),
            category_candidates: default_category_candidates(),
            category_limit: default_category_limit(),
            merchant_limit: default_merchant_limit(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_max_entries: None,
            failure_threshold: default_failure_threshold(),
            cool_down_ms: default_cool_down_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl SearchConfig {
    /// Defaults overridden by whatever `SEARCH_*` variables are set.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            product_mode: get_env_parsed("SEARCH_PRODUCT_MODE", defaults.product_mode),
            debounce_ms: get_env_parsed("SEARCH_DEBOUNCE_MS", defaults.debounce_ms),
            cache_ttl_ms: get_env_parsed("SEARCH_CACHE_TTL_MS", defaults.cache_ttl_ms),
            cache_max_entries: get_env_opt("SEARCH_CACHE_MAX_ENTRIES")
                .and_then(|v| v.parse().ok()),
            failure_threshold: get_env_parsed("SEARCH_FAILURE_THRESHOLD", defaults.failure_threshold),
            cool_down_ms: get_env_parsed("SEARCH_COOL_DOWN_MS", defaults.cool_down_ms),
            request_timeout_ms: get_env_parsed(
                "SEARCH_REQUEST_TIMEOUT_MS",
                defaults.request_timeout_ms,
            ),
            ..defaults
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            cool_down: Duration::from_millis(self.cool_down_ms),
        }
    }
}

fn get_env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_parsed<T: FromStr>(key: &str, default: T) -> T {
    match get_env_opt(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("ignoring unparsable {key}={raw}");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = SearchConfig::default();
        assert_eq!(config.product_mode, ProductMode::Primary);
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!((config.initial_page_size, config.page_increment, config.max_products), (10, 5, 20));
        assert_eq!(config.cache_ttl(), Duration::from_secs(120));
        assert_eq!(config.circuit_breaker().failure_threshold, 3);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: SearchConfig =
            serde_json::from_str(r#"{ "product_mode": "document_store", "debounce_ms": 150 }"#).unwrap();
        assert_eq!(config.product_mode, ProductMode::DocumentStore);
        assert_eq!(config.debounce_ms, 150);
        assert_eq!(config.page_increment, 5);
    }

    #[test]
    fn test_product_mode_parses() {
        assert_eq!("Primary".parse::<ProductMode>(), Ok(ProductMode::Primary));
        assert_eq!("fallback".parse::<ProductMode>(), Ok(ProductMode::DocumentStore));
        assert!("elastic".parse::<ProductMode>().is_err());
    }
}
