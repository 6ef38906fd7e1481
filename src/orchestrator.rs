//! Query session state and the public search operations.
//!
//! A `SearchOrchestrator` owns one query session. Every operation that starts
//! a fetch bumps the session generation and remembers the value it started
//! with; results are committed only if the generation is still the same when
//! they arrive, so answers for a superseded term are dropped instead of
//! overwriting newer state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use crate::backends::ConnectivityProbe;
use crate::cache::ResultCache;
use crate::config::SearchConfig;
use crate::data_models::{
    AggregatedResults, CategorySuggestion, MerchantSuggestion, PaginationCursor,
    ProductSuggestion, SearchQuery,
};
use crate::debounce::Debouncer;
use crate::dedup::RequestDeduplicator;
use crate::error::SearchError;
use crate::fetcher::MultiSourceFetcher;

/// Cache namespace for aggregated responses.
pub const SEARCH_NAMESPACE: &str = "search";

pub const GENERIC_FAILURE_MESSAGE: &str = "Search failed. Please try again.";
pub const NETWORK_FAILURE_MESSAGE: &str =
    "No internet connection. Check your network and try again.";

const UPDATE_TERM_KEY: &str = "update-term";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    #[default]
    Idle,
    Loading,
    Success,
    LoadingMore,
    Error,
}

/// Read-only view of a session, published after every state change.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct SearchSnapshot {
    pub term: String,
    pub status: SearchStatus,
    pub product_suggestions: Vec<ProductSuggestion>,
    pub category_suggestions: Vec<CategorySuggestion>,
    pub merchant_suggestions: Vec<MerchantSuggestion>,
    pub is_loading: bool,
    pub is_loading_more: bool,
    pub has_more_products: bool,
    pub error_message: Option<String>,
    pub is_network_error: bool,
}

/// Services shared by every session: the fetcher (and its circuit breaker),
/// the response cache and the request deduplicator.
#[derive(Clone)]
pub struct SearchServices {
    pub fetcher: Arc<MultiSourceFetcher>,
    pub cache: Arc<ResultCache<AggregatedResults>>,
    pub dedup: Arc<RequestDeduplicator<AggregatedResults>>,
    pub connectivity: Arc<dyn ConnectivityProbe>,
}

impl SearchServices {
    pub fn new(
        fetcher: Arc<MultiSourceFetcher>,
        connectivity: Arc<dyn ConnectivityProbe>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            fetcher,
            cache: Arc::new(ResultCache::new(config.cache_max_entries)),
            dedup: Arc::new(RequestDeduplicator::new()),
            connectivity,
        }
    }
}

#[derive(Debug, Clone)]
struct Failure {
    message: String,
    is_network: bool,
}

#[derive(Default)]
struct Session {
    query: Option<SearchQuery>,
    generation: u64,
    status: SearchStatus,
    products: Vec<ProductSuggestion>,
    categories: Vec<CategorySuggestion>,
    merchants: Vec<MerchantSuggestion>,
    cursor: PaginationCursor,
    paginated: bool,
    has_more_products: bool,
    error: Option<Failure>,
}

impl Session {
    fn snapshot(&self) -> SearchSnapshot {
        SearchSnapshot {
            term: self
                .query
                .as_ref()
                .map(|query| query.term.clone())
                .unwrap_or_default(),
            status: self.status,
            product_suggestions: self.products.clone(),
            category_suggestions: self.categories.clone(),
            merchant_suggestions: self.merchants.clone(),
            is_loading: self.status == SearchStatus::Loading,
            is_loading_more: self.status == SearchStatus::LoadingMore,
            has_more_products: self.has_more_products,
            error_message: self.error.as_ref().map(|failure| failure.message.clone()),
            is_network_error: self.error.as_ref().is_some_and(|failure| failure.is_network),
        }
    }

    fn reset(&mut self) {
        *self = Session {
            generation: self.generation + 1,
            ..Session::default()
        };
    }

    /// Starts a new fetch for `query`, dropping everything from the previous
    /// one. Returns the generation the fetch must commit under.
    fn begin(&mut self, query: SearchQuery) -> u64 {
        self.reset();
        self.query = Some(query);
        self.status = SearchStatus::Loading;
        self.generation
    }

    fn apply_results(&mut self, results: AggregatedResults, config: &SearchConfig) {
        let mut products = results.products.items;
        products.truncate(config.max_products);
        self.products = products;
        self.cursor = results.products.cursor;
        self.cursor.merged_count = self.products.len();
        self.paginated = results.products.paginated;
        self.has_more_products = self.paginated
            && self.products.len() >= config.initial_page_size as usize
            && self.products.len() < config.max_products
            && !self.cursor.all_exhausted();
        self.categories = results.categories;
        self.merchants = results.merchants;
        self.sync_offset();
        self.status = SearchStatus::Success;
        self.error = None;
    }

    fn append_page(&mut self, items: Vec<ProductSuggestion>, cursor: PaginationCursor, config: &SearchConfig) {
        let fetched = items.len();
        let room = config.max_products.saturating_sub(self.products.len());
        self.products.extend(items.into_iter().take(room));
        self.cursor = cursor;
        self.cursor.merged_count = self.products.len();
        // A short page is the exhaustion signal.
        self.has_more_products = fetched >= config.page_increment as usize
            && self.products.len() < config.max_products
            && !self.cursor.all_exhausted();
        self.sync_offset();
        self.status = SearchStatus::Success;
        self.error = None;
    }

    fn fail(&mut self, failure: Failure) {
        self.status = SearchStatus::Error;
        self.error = Some(failure);
    }

    fn sync_offset(&mut self) {
        let count = u32::try_from(self.products.len()).unwrap_or(u32::MAX);
        if let Some(query) = &mut self.query {
            query.page_offset = count;
        }
    }
}

pub struct SearchOrchestrator {
    services: SearchServices,
    config: SearchConfig,
    debouncer: Debouncer,
    session: Mutex<Session>,
    snapshot_tx: watch::Sender<SearchSnapshot>,
}

impl SearchOrchestrator {
    pub fn new(services: SearchServices, config: SearchConfig) -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(SearchSnapshot::default());
        Arc::new(Self {
            services,
            config,
            debouncer: Debouncer::new(),
            session: Mutex::new(Session::default()),
            snapshot_tx,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SearchSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, session: &Session) {
        self.snapshot_tx.send_replace(session.snapshot());
    }

    fn begin(&self, query: SearchQuery) -> u64 {
        let mut session = self.session();
        let generation = session.begin(query);
        self.publish(&session);
        generation
    }

    /// Applies `update` only if no newer operation started since `generation`.
    fn commit(&self, generation: u64, update: impl FnOnce(&mut Session)) -> bool {
        let mut session = self.session();
        if session.generation != generation {
            log::debug!(
                "dropping stale result (generation {generation}, current {})",
                session.generation
            );
            return false;
        }
        update(&mut session);
        self.publish(&session);
        true
    }

    /// Entry point for live typing. Loading is shown right away; the fetch
    /// runs once the term has been stable for the debounce delay. A blank term
    /// clears the session immediately.
    pub fn update_term(self: &Arc<Self>, term: &str, locale: &str) {
        let Some(query) = SearchQuery::new(term, locale) else {
            self.clear();
            return;
        };
        let generation = self.begin(query.clone());
        let this = Arc::clone(self);
        self.debouncer
            .schedule(UPDATE_TERM_KEY, self.config.debounce(), async move {
                this.run_pipeline(generation, query).await;
            });
    }

    /// Immediate search, for explicit submission.
    pub async fn search(&self, term: &str, locale: &str) {
        let Some(query) = SearchQuery::new(term, locale) else {
            self.clear();
            return;
        };
        self.debouncer.cancel(UPDATE_TERM_KEY);
        let generation = self.begin(query.clone());
        self.run_pipeline(generation, query).await;
    }

    /// Fetches the next page of products for the current term. Does nothing
    /// while another fetch is running, after a short page, or once the
    /// product cap is reached.
    pub async fn load_more(&self, locale: &str) {
        let (generation, term, cursor, exclude) = {
            let mut session = self.session();
            let Some(query) = session.query.clone() else {
                return;
            };
            if session.status != SearchStatus::Success
                || !session.paginated
                || !session.has_more_products
                || session.products.len() >= self.config.max_products
            {
                return;
            }
            session.status = SearchStatus::LoadingMore;
            self.publish(&session);
            let exclude: HashSet<String> = session.products.iter().map(|p| p.id.clone()).collect();
            (session.generation, query.term, session.cursor.clone(), exclude)
        };

        log::debug!("loading more products for {term:?} ({locale})");
        let result = self
            .services
            .fetcher
            .fetch_product_page(&term, &cursor, self.config.page_increment, &exclude)
            .await;

        match result {
            Ok(page) => {
                self.commit(generation, |session| {
                    session.append_page(page.items, page.cursor, &self.config)
                });
            }
            Err(err) => {
                let failure = self.classify(&err).await;
                self.commit(generation, |session| session.fail(failure));
            }
        }
    }

    /// Back to idle: no term, no results, nothing pending.
    pub fn clear(&self) {
        self.debouncer.cancel(UPDATE_TERM_KEY);
        let mut session = self.session();
        if let Some(query) = &session.query {
            self.services.dedup.cancel(&query.cache_key());
        }
        session.reset();
        self.publish(&session);
    }

    /// Runs the pipeline again for the current term.
    pub async fn retry(&self) {
        let current = self.session().query.clone();
        let Some(mut query) = current else {
            return;
        };
        query.page_offset = 0;
        let generation = self.begin(query.clone());
        self.run_pipeline(generation, query).await;
    }

    async fn run_pipeline(&self, generation: u64, query: SearchQuery) {
        let key = query.cache_key();
        let result = match self.services.cache.get(SEARCH_NAMESPACE, &key) {
            Some(cached) => {
                log::debug!("cache hit for {key}");
                Ok(cached)
            }
            None => {
                let fetcher = Arc::clone(&self.services.fetcher);
                let cache = Arc::clone(&self.services.cache);
                let ttl = self.config.cache_ttl();
                let cache_key = key.clone();
                self.services
                    .dedup
                    .deduplicate(&key, move || async move {
                        let results = fetcher.aggregate(&query.term, &query.locale).await?;
                        cache.set(SEARCH_NAMESPACE, &cache_key, results.clone(), ttl);
                        Ok(results)
                    })
                    .await
            }
        };

        match result {
            Ok(results) => {
                self.commit(generation, |session| {
                    session.apply_results(results, &self.config)
                });
            }
            Err(err) => {
                let failure = self.classify(&err).await;
                self.commit(generation, |session| session.fail(failure));
            }
        }
    }

    async fn classify(&self, err: &SearchError) -> Failure {
        let offline = !self.services.connectivity.is_online().await;
        if offline || err.is_transport() {
            log::warn!("search failed, network unavailable: {err}");
            Failure {
                message: NETWORK_FAILURE_MESSAGE.to_string(),
                is_network: true,
            }
        } else {
            log::error!("search failed: {err}");
            Failure {
                message: GENERIC_FAILURE_MESSAGE.to_string(),
                is_network: false,
            }
        }
    }
}
