//! Minimal HTTP surface: a health check and read-only catalog endpoints,
//! mirroring the teacher's `api.rs` handler shape (a `read_state`-style
//! helper mapping store errors onto HTTP status codes).

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use catalog_core::catalog::{CatalogStore, TreeOptions};
use catalog_core::error::{CatalogError, ErrorKind};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct ApiState {
    store: Arc<CatalogStore>,
}

pub fn build_router(store: Arc<CatalogStore>) -> Router {
    let state = ApiState { store };
    Router::new()
        .route("/health", get(api_health))
        .route("/tree", get(api_tree))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

async fn api_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Deserialize)]
struct TreeQuery {
    root: String,
    max_depth: Option<usize>,
    child_threshold: Option<usize>,
}

async fn api_tree(State(state): State<ApiState>, Query(q): Query<TreeQuery>) -> Response {
    let mut options = TreeOptions::default();
    if let Some(d) = q.max_depth {
        options.max_depth = d;
    }
    if let Some(t) = q.child_threshold {
        options.child_threshold = t;
    }
    match state.store.get_tree(&q.root, &options) {
        Ok(tree) => Json(tree).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: CatalogError) -> Response {
    let status = match e.kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Cancelled => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.kind.to_string(), "message": e.message }))).into_response()
}
