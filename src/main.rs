use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use scout::api::{AppState, create_router};
use scout::backends::{
    ConnectivityProbe, DocumentStore, HttpConnectivityProbe, HttpSearchIndex, SearchIndex,
};
use scout::circuit_breaker::CircuitBreaker;
use scout::config::{AppConfig, CONFIG};
use scout::db::{Database, ProductCatalog};
use scout::fetcher::{MultiSourceFetcher, SearchIndexes};
use scout::orchestrator::{SearchOrchestrator, SearchServices};

#[derive(Parser)]
#[command(name = "scout", about = "Marketplace search aggregation service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the search API over HTTP.
    Serve {
        /// Address to bind, overrides BIND_ADDR.
        #[arg(long)]
        addr: Option<String>,
    },
    /// Run one search and print the resulting state as JSON.
    Query {
        term: String,
        #[arg(long, default_value = "en")]
        locale: String,
    },
}

fn index(config: &AppConfig, name: &str) -> Result<Arc<dyn SearchIndex>> {
    let index = HttpSearchIndex::new(&config.search_endpoint(), name)
        .with_context(|| format!("Failed to set up search index {name}"))?;
    Ok(Arc::new(index))
}

async fn build_services(config: &AppConfig) -> Result<SearchServices> {
    let indexes = SearchIndexes {
        products: index(config, &config.products_index)?,
        merchant_products: index(config, &config.merchant_products_index)?,
        merchants: index(config, &config.merchants_index)?,
        categories: index(config, &config.categories_index)?,
    };

    let document_store: Option<Arc<dyn DocumentStore>> = match &config.mongo_uri {
        Some(uri) => {
            let db = Database::new(uri, &config.mongo_db_name).await?;
            Some(Arc::new(ProductCatalog::new(db)))
        }
        None => {
            log::info!("MONGO_URI not set, running without document store fallback");
            None
        }
    };

    let breaker = Arc::new(CircuitBreaker::new(config.search.circuit_breaker()));
    let fetcher = Arc::new(MultiSourceFetcher::new(
        indexes,
        document_store,
        breaker,
        config.search.clone(),
    ));
    let connectivity: Arc<dyn ConnectivityProbe> =
        Arc::new(HttpConnectivityProbe::new(&config.search_base_url)?);

    Ok(SearchServices::new(fetcher, connectivity, &config.search))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber (also collects records from the log crate)
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = &*CONFIG;
    let services = build_services(config).await?;

    match cli.command {
        Command::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| config.bind_addr.clone());
            let state = Arc::new(AppState::new(services, config.search.clone()));
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            tracing::info!("listening on {addr}");
            axum::serve(listener, create_router(state))
                .await
                .context("Server error")?;
        }
        Command::Query { term, locale } => {
            let orchestrator = SearchOrchestrator::new(services, config.search.clone());
            orchestrator.search(&term, &locale).await;
            println!("{}", serde_json::to_string_pretty(&orchestrator.snapshot())?);
        }
    }
    Ok(())
}
