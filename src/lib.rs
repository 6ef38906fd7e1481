pub mod api;
pub mod backends;
pub mod cache;
pub mod category_scorer;
pub mod circuit_breaker;
pub mod config;
pub mod data_models;
pub mod db;
pub mod debounce;
pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
