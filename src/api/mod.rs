use axum::{
    Router,
    routing::{get, post},
};
use dashmap::DashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::SearchConfig;
use crate::orchestrator::{SearchOrchestrator, SearchServices};

pub mod handlers;
pub mod models;

/// Shared services plus one orchestrator per client session.
pub struct AppState {
    pub services: SearchServices,
    pub config: SearchConfig,
    pub sessions: DashMap<String, Arc<SearchOrchestrator>>,
}

impl AppState {
    pub fn new(services: SearchServices, config: SearchConfig) -> Self {
        Self {
            services,
            config,
            sessions: DashMap::new(),
        }
    }

    pub fn session(&self, id: &str) -> Option<Arc<SearchOrchestrator>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/sessions", post(handlers::create_session))
        .route(
            "/api/sessions/:id",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/api/sessions/:id/term", post(handlers::update_term))
        .route("/api/sessions/:id/search", post(handlers::search))
        .route("/api/sessions/:id/more", post(handlers::load_more))
        .route("/api/sessions/:id/retry", post(handlers::retry))
        .route("/api/circuits", get(handlers::circuits))
        .with_state(state)
        .layer(cors)
}
