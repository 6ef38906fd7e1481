use std::collections::{HashMap, HashSet};

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// A normalized query. Construction fails for blank terms so an empty term
/// can never reach the fetch layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    pub locale: String,
    pub page_offset: u32,
}

impl SearchQuery {
    pub fn new(term: &str, locale: &str) -> Option<SearchQuery> {
        let term = term.trim();
        if term.is_empty() {
            return None;
        }
        Some(SearchQuery {
            term: term.to_string(),
            locale: locale.trim().to_string(),
            page_offset: 0,
        })
    }

    /// Key shared by the result cache and the request deduplicator.
    pub fn cache_key(&self) -> String {
        format!("{}|{}", self.term, self.locale)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProductSuggestion {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub image_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CategorySuggestion {
    pub display_name: String,
    pub category_key: String,
    pub subcategory_key: Option<String>,
    pub subsubcategory_key: Option<String>,
    /// 0 = top level, 1 = subcategory, 2 = sub-subcategory.
    pub level: u8,
}

impl CategorySuggestion {
    /// All keys present on this node, top level first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.category_key.as_str())
            .chain(self.subcategory_key.as_deref())
            .chain(self.subsubcategory_key.as_deref())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MerchantSuggestion {
    pub id: String,
    pub name: String,
    pub logo_url: Option<String>,
    pub categories: Vec<String>,
}

// =============================================================================
// Raw records as returned by the search indexes
// =============================================================================

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    #[serde(rename = "objectID", alias = "id")]
    pub object_id: String,
    #[serde(default, alias = "productName")]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    pub image_url: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl From<ProductRecord> for ProductSuggestion {
    fn from(record: ProductRecord) -> Self {
        let image_url = record
            .image_url
            .or_else(|| record.images.into_iter().next());
        ProductSuggestion {
            id: record.object_id,
            name: record.name,
            price: record.price,
            image_url,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MerchantRecord {
    #[serde(rename = "objectID", alias = "id")]
    pub object_id: String,
    #[serde(alias = "shopName")]
    pub name: String,
    pub logo_url: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl From<MerchantRecord> for MerchantSuggestion {
    fn from(record: MerchantRecord) -> Self {
        MerchantSuggestion {
            id: record.object_id,
            name: record.name,
            logo_url: record.logo_url,
            categories: record.categories,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    #[serde(alias = "name")]
    pub display_name: String,
    pub category_key: String,
    pub subcategory_key: Option<String>,
    pub subsubcategory_key: Option<String>,
    pub level: Option<u8>,
    /// Display names keyed by locale.
    #[serde(default)]
    pub translations: HashMap<String, String>,
}

impl CategoryRecord {
    pub fn into_suggestion(self, locale: &str) -> CategorySuggestion {
        // Without an explicit level, depth is implied by which keys are set.
        let level = self.level.unwrap_or(match (&self.subcategory_key, &self.subsubcategory_key) {
            (_, Some(_)) => 2,
            (Some(_), None) => 1,
            (None, None) => 0,
        });
        let display_name = self
            .translations
            .get(locale)
            .cloned()
            .unwrap_or(self.display_name);
        CategorySuggestion {
            display_name,
            category_key: self.category_key,
            subcategory_key: self.subcategory_key,
            subsubcategory_key: self.subsubcategory_key,
            level: level.min(2),
        }
    }
}

/// Product document as stored in the document store collections.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProductDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
}

impl From<ProductDoc> for ProductSuggestion {
    fn from(doc: ProductDoc) -> Self {
        ProductSuggestion {
            id: doc.id.to_hex(),
            name: doc.name,
            price: doc.price,
            image_url: doc.image_url,
        }
    }
}

// =============================================================================
// Sources and pagination
// =============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Products,
    MerchantProducts,
    Merchants,
    Categories,
    DocumentStore,
}

impl SourceId {
    /// Paginated product sources in merge priority order.
    pub const PRODUCT_SOURCES: [SourceId; 2] = [SourceId::Products, SourceId::MerchantProducts];

    pub fn circuit_name(&self) -> &'static str {
        match self {
            SourceId::Products => "products-index",
            SourceId::MerchantProducts => "merchant-products-index",
            SourceId::Merchants => "merchants-index",
            SourceId::Categories => "categories-index",
            SourceId::DocumentStore => "document-store",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaginationCursor {
    pub sources_exhausted: HashSet<SourceId>,
    pub per_source_offset: HashMap<SourceId, u32>,
    pub merged_count: usize,
}

impl PaginationCursor {
    pub fn offset(&self, source: SourceId) -> u32 {
        self.per_source_offset.get(&source).copied().unwrap_or(0)
    }

    pub fn is_exhausted(&self, source: SourceId) -> bool {
        self.sources_exhausted.contains(&source)
    }

    pub fn all_exhausted(&self) -> bool {
        SourceId::PRODUCT_SOURCES
            .iter()
            .all(|source| self.is_exhausted(*source))
    }

    /// Records a page fetched from `source` of which the first `consumed`
    /// hits were merged or skipped as duplicates. The offset moves past the
    /// consumed hits only, so anything cut by the merge limit is requested
    /// again. A short page marks the source exhausted once all of it was
    /// consumed.
    pub fn advance(&mut self, source: SourceId, fetched: usize, consumed: usize, page_size: u32) {
        let consumed = consumed.min(fetched);
        let step = u32::try_from(consumed).unwrap_or(u32::MAX);
        let offset = self.per_source_offset.entry(source).or_insert(0);
        *offset = offset.saturating_add(step);
        if fetched < page_size as usize && consumed == fetched {
            self.sources_exhausted.insert(source);
        }
    }

    pub fn exhaust_all(&mut self) {
        self.sources_exhausted.extend(SourceId::PRODUCT_SOURCES);
    }
}

/// One merged page of products together with the cursor that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductPage {
    pub items: Vec<ProductSuggestion>,
    pub cursor: PaginationCursor,
    /// False when the page came from the document store, which has no paging.
    pub paginated: bool,
}

/// Everything one aggregation pass produces for a (term, locale) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedResults {
    pub products: ProductPage,
    pub categories: Vec<CategorySuggestion>,
    pub merchants: Vec<MerchantSuggestion>,
}
