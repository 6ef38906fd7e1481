use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use crate::orchestrator::SearchOrchestrator;

use super::AppState;
use super::models::{
    CircuitsResponse, LoadMoreRequest, SessionCreated, SessionResponse, TermRequest,
};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn lookup(state: &AppState, id: &str) -> Result<Arc<SearchOrchestrator>, (StatusCode, String)> {
    state
        .session(id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown session: {id}")))
}

fn respond(id: String, orchestrator: &SearchOrchestrator) -> Json<SessionResponse> {
    Json(SessionResponse {
        session_id: id,
        snapshot: orchestrator.snapshot(),
    })
}

pub async fn create_session(State(state): State<Arc<AppState>>) -> Json<SessionCreated> {
    let session_id = nanoid::nanoid!();
    let orchestrator = SearchOrchestrator::new(state.services.clone(), state.config.clone());
    state.sessions.insert(session_id.clone(), orchestrator);
    log::info!("created search session {session_id}");
    Json(SessionCreated { session_id })
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SessionResponse> {
    let orchestrator = lookup(&state, &id)?;
    Ok(respond(id, &orchestrator))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let (_, orchestrator) = state
        .sessions
        .remove(&id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown session: {id}")))?;
    orchestrator.clear();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_term(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<TermRequest>,
) -> ApiResult<SessionResponse> {
    let orchestrator = lookup(&state, &id)?;
    orchestrator.update_term(&request.term, &request.locale);
    Ok(respond(id, &orchestrator))
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<TermRequest>,
) -> ApiResult<SessionResponse> {
    let orchestrator = lookup(&state, &id)?;
    orchestrator.search(&request.term, &request.locale).await;
    Ok(respond(id, &orchestrator))
}

pub async fn load_more(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<LoadMoreRequest>,
) -> ApiResult<SessionResponse> {
    let orchestrator = lookup(&state, &id)?;
    orchestrator.load_more(&request.locale).await;
    Ok(respond(id, &orchestrator))
}

pub async fn retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SessionResponse> {
    let orchestrator = lookup(&state, &id)?;
    orchestrator.retry().await;
    Ok(respond(id, &orchestrator))
}

pub async fn circuits(State(state): State<Arc<AppState>>) -> Json<CircuitsResponse> {
    Json(CircuitsResponse {
        circuits: state.services.fetcher.breaker().snapshot(),
    })
}
