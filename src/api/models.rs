use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitSnapshot;
use crate::orchestrator::SearchSnapshot;

fn default_locale() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
pub struct TermRequest {
    pub term: String,
    #[serde(default = "default_locale")]
    pub locale: String,
}

#[derive(Debug, Deserialize)]
pub struct LoadMoreRequest {
    #[serde(default = "default_locale")]
    pub locale: String,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub snapshot: SearchSnapshot,
}

#[derive(Debug, Serialize)]
pub struct CircuitsResponse {
    pub circuits: Vec<CircuitSnapshot>,
}
