//! Boundaries to the search indexes and the document store.
//!
//! The engine only sees the traits here. `HttpSearchIndex` is the production
//! transport for the hosted indexes; the MongoDB-backed document store lives
//! in `db`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data_models::ProductSuggestion;
use crate::error::{SearchError, SearchResult};

/// Query sent to a search index. Pages are zero based; when `offset` and
/// `length` are set they take precedence over `page`/`hits_per_page`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub query: String,
    pub page: u32,
    pub hits_per_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl IndexRequest {
    pub fn new(query: &str, hits_per_page: u32) -> Self {
        Self {
            query: query.to_string(),
            page: 0,
            hits_per_page,
            offset: None,
            length: None,
            locale: None,
        }
    }

    /// Request for `length` hits starting at `offset`, which need not be a
    /// multiple of any page size.
    pub fn at_offset(query: &str, offset: u32, length: u32) -> Self {
        Self {
            offset: Some(offset),
            length: Some(length),
            ..Self::new(query, length)
        }
    }

    /// First hit index and number of hits this request covers.
    pub fn window(&self) -> (u32, u32) {
        match (self.offset, self.length) {
            (Some(offset), Some(length)) => (offset, length),
            _ => (self.page.saturating_mul(self.hits_per_page), self.hits_per_page),
        }
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.locale = Some(locale.to_string());
        self
    }
}

/// A single hosted search index. Returns raw hit records in relevance order.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    fn name(&self) -> &str;

    async fn query(&self, request: &IndexRequest) -> SearchResult<Vec<Value>>;
}

/// Prefix-range lookups against the product collections of the document
/// store, ordered by name.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_name_prefix(
        &self,
        collection: &str,
        prefix: &str,
        limit: u32,
    ) -> SearchResult<Vec<ProductSuggestion>>;
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Probe for environments without a way to check connectivity.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeOnline;

#[async_trait]
impl ConnectivityProbe for AssumeOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

#[derive(Deserialize, Debug)]
struct IndexResponse {
    #[serde(default)]
    hits: Vec<Value>,
}

/// Credentials and location of the hosted search service.
#[derive(Debug, Clone)]
pub struct SearchServiceEndpoint {
    pub base_url: String,
    pub app_id: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

pub struct HttpSearchIndex {
    client: reqwest::Client,
    url: Url,
    index: String,
    endpoint: SearchServiceEndpoint,
}

impl HttpSearchIndex {
    pub fn new(endpoint: &SearchServiceEndpoint, index: &str) -> SearchResult<Self> {
        let base = if endpoint.base_url.ends_with('/') {
            endpoint.base_url.clone()
        } else {
            format!("{}/", endpoint.base_url)
        };
        let url = Url::parse(&base)
            .and_then(|base| base.join(&format!("1/indexes/{index}/query")))
            .map_err(|e| SearchError::Config(format!("bad search url {}: {e}", endpoint.base_url)))?;
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url,
            index: index.to_string(),
            endpoint: endpoint.clone(),
        })
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    fn name(&self) -> &str {
        &self.index
    }

    async fn query(&self, request: &IndexRequest) -> SearchResult<Vec<Value>> {
        let mut builder = self.client.post(self.url.clone()).json(request);
        if let Some(app_id) = &self.endpoint.app_id {
            builder = builder.header("X-Search-Application-Id", app_id);
        }
        if let Some(api_key) = &self.endpoint.api_key {
            builder = builder.header("X-Search-Api-Key", api_key);
        }

        let response = builder.send().await?.error_for_status()?;
        let body: IndexResponse = response.json().await?;
        log::debug!(
            "index {} returned {} hits for {:?} (from {})",
            self.index,
            body.hits.len(),
            request.query,
            request.window().0
        );
        Ok(body.hits)
    }
}

/// Treats any HTTP answer from the search host as "online"; only connect and
/// timeout failures count as offline.
pub struct HttpConnectivityProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpConnectivityProbe {
    pub fn new(url: &str) -> SearchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| SearchError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_online(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(e) => !(e.is_connect() || e.is_timeout()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unaligned_offset_is_sent_as_offset_and_length() {
        let request = IndexRequest::at_offset("shoe", 10, 4);
        assert_eq!(request.window(), (10, 4));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["offset"], 10);
        assert_eq!(json["length"], 4);

        assert_eq!(IndexRequest::new("shoe", 10).window(), (0, 10));
    }

    #[test]
    fn test_request_wire_format() {
        let request = IndexRequest::new("shoe", 10).with_locale("en");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "query": "shoe", "page": 0, "hitsPerPage": 10, "locale": "en" })
        );

        let json = serde_json::to_value(IndexRequest::new("shoe", 10)).unwrap();
        assert!(json.get("locale").is_none());
    }

    #[test]
    fn test_index_url_is_joined_from_base() {
        let endpoint = SearchServiceEndpoint {
            base_url: "https://search.example.com/".to_string(),
            app_id: None,
            api_key: None,
            timeout: Duration::from_secs(5),
        };
        let index = HttpSearchIndex::new(&endpoint, "products").unwrap();
        assert_eq!(
            index.url.as_str(),
            "https://search.example.com/1/indexes/products/query"
        );
        assert_eq!(index.name(), "products");
    }
}
