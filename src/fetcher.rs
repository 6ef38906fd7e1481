//! Parallel fan-out to the search backends and deterministic merging of what
//! comes back.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backends::{DocumentStore, IndexRequest, SearchIndex};
use crate::category_scorer;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{ProductMode, SearchConfig};
use crate::data_models::{
    AggregatedResults, CategoryRecord, CategorySuggestion, MerchantRecord, MerchantSuggestion,
    PaginationCursor, ProductPage, ProductRecord, ProductSuggestion, SourceId,
};
use crate::db::collections;
use crate::error::{SearchError, SearchResult};

/// What one source added to a merge.
#[derive(Debug, Clone, PartialEq)]
pub enum Contribution<T> {
    Hits(Vec<T>),
    /// The source failed or its circuit is open. Carries the reason when
    /// there is one.
    Unavailable(Option<String>),
}

impl<T> Contribution<T> {
    fn is_unavailable(&self) -> bool {
        matches!(self, Contribution::Unavailable(_))
    }

    fn into_hits(self) -> Vec<T> {
        match self {
            Contribution::Hits(hits) => hits,
            Contribution::Unavailable(_) => Vec::new(),
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            Contribution::Unavailable(reason) => reason.as_deref(),
            Contribution::Hits(_) => None,
        }
    }
}

/// Result of merging several groups: the merged items plus, per group, how
/// many of its items were looked at (merged or skipped as duplicates) before
/// the limit was hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged<T> {
    pub items: Vec<T>,
    pub consumed: Vec<usize>,
}

/// Appends `groups` in order, skipping ids already in `seen`, until `limit`
/// items have been taken. Earlier groups win on duplicate ids.
pub fn merge_counted<T, F>(
    groups: impl IntoIterator<Item = Vec<T>>,
    seen: &mut HashSet<String>,
    limit: usize,
    id_of: F,
) -> Merged<T>
where
    F: Fn(&T) -> &str,
{
    let mut items = Vec::new();
    let mut consumed = Vec::new();
    for group in groups {
        let mut used = 0;
        for item in group {
            if items.len() >= limit {
                break;
            }
            used += 1;
            if seen.insert(id_of(&item).to_string()) {
                items.push(item);
            }
        }
        consumed.push(used);
    }
    Merged { items, consumed }
}

/// `merge_counted` for callers that only need the items.
pub fn merge_unique<T, F>(
    groups: impl IntoIterator<Item = Vec<T>>,
    seen: &mut HashSet<String>,
    limit: usize,
    id_of: F,
) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    merge_counted(groups, seen, limit, id_of).items
}

/// Decodes raw hits, dropping (and logging) records that do not fit `R`.
fn decode_hits<R: DeserializeOwned>(index: &str, hits: Vec<Value>) -> Vec<R> {
    hits.into_iter()
        .filter_map(|hit| match serde_json::from_value::<R>(hit) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("{index}: skipping undecodable record: {e}");
                None
            }
        })
        .collect()
}

/// Capitalizes the first character, leaving the rest as typed.
pub fn capitalize_first(term: &str) -> String {
    let mut chars = term.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The four search indexes the fetcher fans out to.
#[derive(Clone)]
pub struct SearchIndexes {
    pub products: Arc<dyn SearchIndex>,
    pub merchant_products: Arc<dyn SearchIndex>,
    pub merchants: Arc<dyn SearchIndex>,
    pub categories: Arc<dyn SearchIndex>,
}

impl SearchIndexes {
    fn get(&self, source: SourceId) -> Option<&Arc<dyn SearchIndex>> {
        match source {
            SourceId::Products => Some(&self.products),
            SourceId::MerchantProducts => Some(&self.merchant_products),
            SourceId::Merchants => Some(&self.merchants),
            SourceId::Categories => Some(&self.categories),
            SourceId::DocumentStore => None,
        }
    }
}

pub struct MultiSourceFetcher {
    indexes: SearchIndexes,
    document_store: Option<Arc<dyn DocumentStore>>,
    breaker: Arc<CircuitBreaker>,
    config: SearchConfig,
}

impl MultiSourceFetcher {
    pub fn new(
        indexes: SearchIndexes,
        document_store: Option<Arc<dyn DocumentStore>>,
        breaker: Arc<CircuitBreaker>,
        config: SearchConfig,
    ) -> Self {
        Self {
            indexes,
            document_store,
            breaker,
            config,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn mode(&self) -> ProductMode {
        self.config.product_mode
    }

    /// Queries one index behind its circuit. Never fails: errors and open
    /// circuits come back as `Unavailable`.
    async fn query_source(&self, source: SourceId, request: IndexRequest) -> Contribution<Value> {
        let Some(index) = self.indexes.get(source) else {
            return Contribution::Unavailable(None);
        };
        let circuit = source.circuit_name();
        let request = &request;
        let result = self
            .breaker
            .execute(
                circuit,
                move || async move { index.query(request).await.map(Contribution::Hits) },
                |err: Option<SearchError>| async move {
                    if let Some(e) = &err {
                        log::warn!("{circuit}: {e}, continuing without it");
                    }
                    Ok(Contribution::Unavailable(err.map(|e| format!("{circuit}: {e}"))))
                },
            )
            .await;
        result.unwrap_or_else(|e| Contribution::Unavailable(Some(e.to_string())))
    }

    async fn query_products(
        &self,
        source: SourceId,
        term: &str,
        offset: u32,
        page_size: u32,
    ) -> Contribution<ProductSuggestion> {
        let request = IndexRequest::at_offset(term, offset, page_size);
        match self.query_source(source, request).await {
            Contribution::Hits(hits) => Contribution::Hits(
                decode_hits::<ProductRecord>(source.circuit_name(), hits)
                    .into_iter()
                    .map(ProductSuggestion::from)
                    .collect(),
            ),
            Contribution::Unavailable(reason) => Contribution::Unavailable(reason),
        }
    }

    /// First page of products for `term`, at most `limit` items.
    pub async fn fetch_products(
        &self,
        term: &str,
        limit: usize,
    ) -> SearchResult<Vec<ProductSuggestion>> {
        let page_size = u32::try_from(limit).unwrap_or(u32::MAX);
        let cursor = PaginationCursor::default();
        let page = self
            .fetch_product_page(term, &cursor, page_size, &HashSet::new())
            .await?;
        Ok(page.items)
    }

    /// Fetches the page after `cursor` from every product source that still
    /// has results, merged in priority order and without ids in `exclude`.
    ///
    /// Individual source failures are absorbed. If every source fails on the
    /// first page the document store is tried instead; when that fails too the
    /// whole fetch fails.
    pub async fn fetch_product_page(
        &self,
        term: &str,
        cursor: &PaginationCursor,
        page_size: u32,
        exclude: &HashSet<String>,
    ) -> SearchResult<ProductPage> {
        let limit = page_size as usize;
        if self.config.product_mode == ProductMode::DocumentStore {
            let items = self.fetch_from_document_store(term, limit, exclude).await?;
            return Ok(Self::document_store_page(items));
        }

        let sources: Vec<SourceId> = SourceId::PRODUCT_SOURCES
            .into_iter()
            .filter(|source| !cursor.is_exhausted(*source))
            .collect();
        let mut next = cursor.clone();
        if sources.is_empty() {
            return Ok(ProductPage {
                items: Vec::new(),
                cursor: next,
                paginated: true,
            });
        }

        // join_all keeps input order, so merge priority does not depend on
        // which source answers first.
        let contributions = join_all(sources.iter().map(|source| {
            self.query_products(*source, term, cursor.offset(*source), page_size)
        }))
        .await;

        if contributions.iter().all(Contribution::is_unavailable) {
            let reason = contributions
                .iter()
                .filter_map(Contribution::reason)
                .collect::<Vec<_>>()
                .join("; ");
            let is_first_page = cursor.per_source_offset.is_empty();
            if is_first_page && self.document_store.is_some() {
                log::warn!("all product indexes unavailable for {term:?}, using document store");
                let items = self.fetch_from_document_store(term, limit, exclude).await?;
                return Ok(Self::document_store_page(items));
            }
            return Err(SearchError::pipeline(if reason.is_empty() {
                "all product sources unavailable".to_string()
            } else {
                reason
            }));
        }

        let fetched: Vec<Option<usize>> = contributions
            .iter()
            .map(|contribution| match contribution {
                Contribution::Hits(hits) => Some(hits.len()),
                Contribution::Unavailable(_) => None,
            })
            .collect();
        let groups = contributions.into_iter().map(Contribution::into_hits);

        let mut seen = exclude.clone();
        let Merged { items, consumed } =
            merge_counted(groups, &mut seen, limit, |p: &ProductSuggestion| p.id.as_str());
        // Unavailable sources keep their offset and are asked again next page.
        for ((source, fetched), consumed) in sources.iter().zip(fetched).zip(consumed) {
            if let Some(fetched) = fetched {
                next.advance(*source, fetched, consumed, page_size);
            }
        }
        next.merged_count += items.len();
        Ok(ProductPage {
            items,
            cursor: next,
            paginated: true,
        })
    }

    fn document_store_page(items: Vec<ProductSuggestion>) -> ProductPage {
        let mut cursor = PaginationCursor::default();
        cursor.exhaust_all();
        cursor.merged_count = items.len();
        ProductPage {
            items,
            cursor,
            paginated: false,
        }
    }

    /// Prefix scans for the term as typed and capitalized, over both product
    /// collections, merged in that order.
    async fn fetch_from_document_store(
        &self,
        term: &str,
        limit: usize,
        exclude: &HashSet<String>,
    ) -> SearchResult<Vec<ProductSuggestion>> {
        let Some(store) = &self.document_store else {
            return Err(SearchError::pipeline("no document store configured"));
        };
        let capitalized = capitalize_first(term);
        let scan_limit = u32::try_from(limit).unwrap_or(u32::MAX);
        let scans: Vec<(&str, &str)> = collections::PRODUCT_COLLECTIONS
            .into_iter()
            .flat_map(|collection| [(collection, term), (collection, capitalized.as_str())])
            .collect();

        let results = join_all(
            scans
                .iter()
                .map(|(collection, prefix)| store.find_by_name_prefix(collection, prefix, scan_limit)),
        )
        .await;

        let mut groups = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for ((collection, prefix), result) in scans.iter().zip(results) {
            match result {
                Ok(items) => groups.push(items),
                Err(e) => {
                    log::warn!("document store scan {collection}/{prefix:?} failed: {e}");
                    failures.push(format!("{}: {e}", SourceId::DocumentStore.circuit_name()));
                }
            }
        }
        if groups.is_empty() {
            return Err(SearchError::pipeline(failures.join("; ")));
        }

        let mut seen = exclude.clone();
        Ok(merge_unique(groups, &mut seen, limit, |p: &ProductSuggestion| p.id.as_str()))
    }

    /// Category matches ranked by `category_scorer`. Failures yield nothing.
    pub async fn fetch_categories(
        &self,
        term: &str,
        locale: &str,
        limit: usize,
    ) -> Vec<CategorySuggestion> {
        let wanted = u32::try_from(limit).unwrap_or(u32::MAX);
        let request =
            IndexRequest::new(term, self.config.category_candidates.max(wanted)).with_locale(locale);
        let hits = self
            .query_source(SourceId::Categories, request)
            .await
            .into_hits();
        let candidates = decode_hits::<CategoryRecord>(SourceId::Categories.circuit_name(), hits)
            .into_iter()
            .map(|record| record.into_suggestion(locale))
            .collect();
        category_scorer::rank(candidates, term, limit)
    }

    /// Merchant matches in index order. Failures yield nothing.
    pub async fn fetch_merchants(&self, term: &str, limit: usize) -> Vec<MerchantSuggestion> {
        let request = IndexRequest::new(term, u32::try_from(limit).unwrap_or(u32::MAX));
        let hits = self
            .query_source(SourceId::Merchants, request)
            .await
            .into_hits();
        let merchants = decode_hits::<MerchantRecord>(SourceId::Merchants.circuit_name(), hits)
            .into_iter()
            .map(MerchantSuggestion::from);
        let mut seen = HashSet::new();
        merge_unique([merchants.collect::<Vec<_>>()], &mut seen, limit, |m: &MerchantSuggestion| {
            m.id.as_str()
        })
    }

    /// One full aggregation pass: first product page, categories and
    /// merchants, all in parallel. Fails only when products fail entirely.
    pub async fn aggregate(&self, term: &str, locale: &str) -> SearchResult<AggregatedResults> {
        let cursor = PaginationCursor::default();
        let exclude = HashSet::new();
        let (products, categories, merchants) = futures::join!(
            self.fetch_product_page(term, &cursor, self.config.initial_page_size, &exclude),
            self.fetch_categories(term, locale, self.config.category_limit),
            self.fetch_merchants(term, self.config.merchant_limit as usize),
        );
        Ok(AggregatedResults {
            products: products?,
            categories,
            merchants,
        })
    }
}
