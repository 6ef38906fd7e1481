#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use scout::backends::{ConnectivityProbe, DocumentStore, IndexRequest, SearchIndex};
use scout::circuit_breaker::CircuitBreaker;
use scout::config::SearchConfig;
use scout::data_models::ProductSuggestion;
use scout::error::{SearchError, SearchResult};
use scout::fetcher::{MultiSourceFetcher, SearchIndexes};
use scout::orchestrator::{SearchOrchestrator, SearchServices};

pub fn product_json(id: &str, name: &str) -> Value {
    json!({ "objectID": id, "name": name, "price": 25.0, "imageUrl": format!("https://img.example.com/{id}.png") })
}

pub fn merchant_json(id: &str, name: &str) -> Value {
    json!({ "objectID": id, "name": name, "categories": ["fashion"] })
}

pub fn category_json(name: &str, keys: &[&str]) -> Value {
    json!({
        "displayName": name,
        "categoryKey": keys[0],
        "subcategoryKey": keys.get(1),
        "subsubcategoryKey": keys.get(2),
    })
}

pub fn numbered_products(prefix: &str, name: &str, count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| product_json(&format!("{prefix}-{i}"), &format!("{name} {i}")))
        .collect()
}

/// In-memory search index. Matches records whose `name` or `displayName`
/// contains the query, case-insensitively, and pages them like the hosted
/// indexes do.
pub struct MockIndex {
    name: String,
    records: Mutex<Vec<Value>>,
    calls: Mutex<Vec<IndexRequest>>,
    failure: Mutex<Option<SearchError>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl MockIndex {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            records: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            delays: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_records(&self, records: Vec<Value>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn fail_with(&self, failure: Option<SearchError>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn delay_query(&self, query: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(query.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<IndexRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// `(offset, length)` of every request, in call order.
    pub fn windows(&self) -> Vec<(u32, u32)> {
        self.calls().iter().map(IndexRequest::window).collect()
    }

    pub fn queried_terms(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.query).collect()
    }
}

#[async_trait]
impl SearchIndex for MockIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, request: &IndexRequest) -> SearchResult<Vec<Value>> {
        self.calls.lock().unwrap().push(request.clone());
        let delay = self.delays.lock().unwrap().get(&request.query).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().unwrap().clone();
        if let Some(err) = failure {
            return Err(err);
        }

        let query = request.query.to_lowercase();
        let matching: Vec<Value> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| {
                record["name"]
                    .as_str()
                    .or_else(|| record["displayName"].as_str())
                    .is_some_and(|name| name.to_lowercase().contains(&query))
            })
            .cloned()
            .collect();
        let (start, length) = request.window();
        Ok(matching
            .into_iter()
            .skip(start as usize)
            .take(length as usize)
            .collect())
    }
}

/// In-memory document store with case-sensitive prefix matching.
#[derive(Default)]
pub struct MockDocumentStore {
    collections: Mutex<HashMap<String, Vec<ProductSuggestion>>>,
    calls: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl MockDocumentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, collection: &str, id: &str, name: &str) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(ProductSuggestion {
                id: id.to_string(),
                name: name.to_string(),
                price: 10.0,
                image_url: None,
            });
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn find_by_name_prefix(
        &self,
        collection: &str,
        prefix: &str,
        limit: u32,
    ) -> SearchResult<Vec<ProductSuggestion>> {
        self.calls
            .lock()
            .unwrap()
            .push((collection.to_string(), prefix.to_string()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(SearchError::backend("document store unavailable"));
        }
        let mut found: Vec<ProductSuggestion> = self
            .collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|products| {
                products
                    .iter()
                    .filter(|p| p.name.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found.truncate(limit as usize);
        Ok(found)
    }
}

pub struct ToggleProbe {
    online: AtomicBool,
}

impl ToggleProbe {
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for ToggleProbe {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Fakes for every backend plus helpers to assemble the engine around them.
pub struct Harness {
    pub products: Arc<MockIndex>,
    pub merchant_products: Arc<MockIndex>,
    pub merchants: Arc<MockIndex>,
    pub categories: Arc<MockIndex>,
    pub document_store: Arc<MockDocumentStore>,
    pub probe: Arc<ToggleProbe>,
    pub breaker: Arc<CircuitBreaker>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&SearchConfig::default())
    }

    pub fn with_config(config: &SearchConfig) -> Self {
        Self {
            products: MockIndex::new("products"),
            merchant_products: MockIndex::new("shop_products"),
            merchants: MockIndex::new("shops"),
            categories: MockIndex::new("categories"),
            document_store: MockDocumentStore::new(),
            probe: Arc::new(ToggleProbe {
                online: AtomicBool::new(true),
            }),
            breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker())),
        }
    }

    pub fn indexes(&self) -> SearchIndexes {
        SearchIndexes {
            products: self.products.clone(),
            merchant_products: self.merchant_products.clone(),
            merchants: self.merchants.clone(),
            categories: self.categories.clone(),
        }
    }

    pub fn fetcher(&self, config: &SearchConfig, with_store: bool) -> Arc<MultiSourceFetcher> {
        let store: Option<Arc<dyn DocumentStore>> = if with_store {
            Some(self.document_store.clone())
        } else {
            None
        };
        Arc::new(MultiSourceFetcher::new(
            self.indexes(),
            store,
            Arc::clone(&self.breaker),
            config.clone(),
        ))
    }

    pub fn services(&self, config: &SearchConfig, with_store: bool) -> SearchServices {
        SearchServices::new(self.fetcher(config, with_store), self.probe.clone(), config)
    }

    pub fn orchestrator(&self, config: &SearchConfig) -> Arc<SearchOrchestrator> {
        SearchOrchestrator::new(self.services(config, false), config.clone())
    }

    pub fn fail_all_indexes(&self, failure: SearchError) {
        for index in [&self.products, &self.merchant_products, &self.merchants, &self.categories] {
            index.fail_with(Some(failure.clone()));
        }
    }

    pub fn heal_all_indexes(&self) {
        for index in [&self.products, &self.merchant_products, &self.merchants, &self.categories] {
            index.fail_with(None);
        }
    }
}
