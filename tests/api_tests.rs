mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use common::{Harness, product_json};
use serde_json::{Value, json};
use tower::ServiceExt;

use scout::api::{AppState, create_router};
use scout::config::SearchConfig;
use scout::error::SearchError;

fn app(harness: &Harness) -> Router {
    let config = SearchConfig::default();
    let state = AppState::new(harness.services(&config, false), config);
    create_router(Arc::new(state))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Ok((status, value))
}

async fn create_session(app: &Router) -> Result<String> {
    let (status, body) = send(app, "POST", "/api/sessions", None).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(body["session_id"].as_str().unwrap_or_default().to_string())
}

#[tokio::test]
async fn test_search_through_session() -> Result<()> {
    let harness = Harness::new();
    harness.products.set_records(vec![product_json("p1", "Shoe")]);
    let app = app(&harness);
    let id = create_session(&app).await?;
    assert!(!id.is_empty());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/sessions/{id}/search"),
        Some(json!({ "term": "shoe" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], id.as_str());
    assert_eq!(body["status"], "success");
    assert_eq!(body["product_suggestions"][0]["id"], "p1");

    let (status, body) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["term"], "shoe");
    Ok(())
}

#[tokio::test]
async fn test_term_update_reports_loading() -> Result<()> {
    let harness = Harness::new();
    let app = app(&harness);
    let id = create_session(&app).await?;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/sessions/{id}/term"),
        Some(json!({ "term": "sho", "locale": "de" })),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "loading");
    assert_eq!(body["is_loading"], true);
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_is_not_found() -> Result<()> {
    let harness = Harness::new();
    let app = app(&harness);

    let (status, _) = send(&app, "GET", "/api/sessions/missing", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/api/sessions/missing/retry", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_deleted_session_is_gone() -> Result<()> {
    let harness = Harness::new();
    let app = app(&harness);
    let id = create_session(&app).await?;

    let (status, _) = send(&app, "DELETE", &format!("/api/sessions/{id}"), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "GET", &format!("/api/sessions/{id}"), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_circuits_endpoint_reports_open_circuit() -> Result<()> {
    let harness = Harness::new();
    harness
        .merchant_products
        .fail_with(Some(SearchError::backend("500 Internal Server Error")));
    harness.products.set_records(vec![product_json("p1", "Shoe")]);
    let app = app(&harness);
    let id = create_session(&app).await?;

    // Different terms so neither the cache nor dedup hides the failures.
    for term in ["shoe", "shoes", "shoe rack"] {
        send(
            &app,
            "POST",
            &format!("/api/sessions/{id}/search"),
            Some(json!({ "term": term })),
        )
        .await?;
    }

    let (status, body) = send(&app, "GET", "/api/circuits", None).await?;
    assert_eq!(status, StatusCode::OK);
    let circuits = body["circuits"].as_array().cloned().unwrap_or_default();
    let merchant = circuits
        .iter()
        .find(|c| c["name"] == "merchant-products-index")
        .expect("merchant products circuit listed");
    assert_eq!(merchant["status"], "open");
    assert_eq!(merchant["consecutive_failures"], 3);
    assert!(merchant["opened_at"].is_string());
    Ok(())
}
