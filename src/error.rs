//! Error types for the search engine.

use thiserror::Error;

/// Substrings that mark an error message as a transport failure rather than a
/// backend or decoding problem.
const TRANSPORT_MARKERS: &[&str] = &[
    "network",
    "connection",
    "connect",
    "timed out",
    "timeout",
    "unreachable",
    "dns",
    "offline",
    "socket",
];

/// Errors produced anywhere between a backend call and the orchestrator.
///
/// The type is `Clone` so a single in-flight result can be handed to every
/// waiter of a deduplicated request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// A single source failed or its circuit is open. Absorbed by the fetcher.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The request never got a response (connect failure, timeout, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with an error.
    #[error("backend error: {0}")]
    Backend(String),

    /// The backend answered with something we could not read.
    #[error("decode error: {0}")]
    Decode(String),

    /// Every contributing source, fallback included, failed.
    #[error("search pipeline failed: {0}")]
    PipelineFailure(String),

    /// Connectivity is absent.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SearchError {
    pub fn source_unavailable(msg: impl Into<String>) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::PipelineFailure(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether this error points at missing connectivity, either by kind or by
    /// what its message says.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) | Self::NetworkUnavailable(_) => true,
            other => {
                let text = other.to_string().to_lowercase();
                TRANSPORT_MARKERS.iter().any(|marker| text.contains(marker))
            }
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Transport(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

impl From<mongodb::error::Error> for SearchError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type SearchResult<T> = Result<T, SearchError>;
