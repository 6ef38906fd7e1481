use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{
    Client, Collection, Database as MongoDatabase,
    bson::{Document, doc},
};
use serde::de::DeserializeOwned;

use crate::backends::DocumentStore;
use crate::data_models::{ProductDoc, ProductSuggestion};
use crate::error::SearchResult;

/// Collection names as constants for consistency
pub mod collections {
    pub const PRODUCTS: &str = "products";
    pub const SHOP_PRODUCTS: &str = "shop_products";

    /// Product collections in merge priority order.
    pub const PRODUCT_COLLECTIONS: [&str; 2] = [PRODUCTS, SHOP_PRODUCTS];
}

/// Upper bound appended to a prefix so a `$lt` range covers every string that
/// starts with it.
const PREFIX_RANGE_END: char = '\u{f8ff}';

/// Range filter matching every `field` value that starts with `prefix`
/// (case-sensitive).
pub fn prefix_range_filter(field: &str, prefix: &str) -> Document {
    doc! {
        field: {
            "$gte": prefix,
            "$lt": format!("{prefix}{PREFIX_RANGE_END}"),
        }
    }
}

/// Main database wrapper providing connection management and collection access
#[derive(Debug, Clone)]
pub struct Database {
    db: MongoDatabase,
}

impl Database {
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        let client_options = ClientOptions::parse(uri)
            .await
            .context("Failed to parse MongoDB connection string")?;

        let client =
            Client::with_options(client_options).context("Failed to create MongoDB client")?;

        // Ping the database to verify connection
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .context("Failed to connect to MongoDB")?;

        log::info!("Connected to MongoDB database: {}", db_name);

        let db = client.database(db_name);

        Ok(Self { db })
    }

    /// Get a typed collection by name
    pub fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Send + Sync,
    {
        self.db.collection(name)
    }
}

/// Read-only access to one collection.
pub struct Repository<T>
where
    T: Send + Sync,
{
    collection: Collection<T>,
}

impl<T> Repository<T>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    pub fn new(collection: Collection<T>) -> Self {
        Self { collection }
    }

    /// Find documents matching a filter, sorted and limited.
    pub async fn find_sorted(
        &self,
        filter: Document,
        sort: Document,
        limit: i64,
    ) -> SearchResult<Vec<T>> {
        let options = FindOptions::builder().sort(sort).limit(limit).build();
        let cursor = self.collection.find(filter).with_options(options).await?;
        Ok(cursor.try_collect().await?)
    }
}

/// The marketplace product catalog, used as the document-store fallback for
/// product suggestions.
pub struct ProductCatalog {
    db: Database,
}

impl ProductCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn repo(&self, collection: &str) -> Repository<ProductDoc> {
        Repository::new(self.db.collection(collection))
    }
}

#[async_trait]
impl DocumentStore for ProductCatalog {
    async fn find_by_name_prefix(
        &self,
        collection: &str,
        prefix: &str,
        limit: u32,
    ) -> SearchResult<Vec<ProductSuggestion>> {
        let docs = self
            .repo(collection)
            .find_sorted(
                prefix_range_filter("name", prefix),
                doc! { "name": 1 },
                i64::from(limit),
            )
            .await?;
        log::debug!("{collection}: {} products with prefix {prefix:?}", docs.len());
        Ok(docs.into_iter().map(ProductSuggestion::from).collect())
    }
}
