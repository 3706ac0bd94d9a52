use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::WebseekError;

use super::router::AppState;

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
    pub response_time: f64,
    pub results: Vec<crate::models::SearchResult>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error wrapper for API handlers; search failures surface as HTTP 500
pub struct ApiError(WebseekError);

impl From<WebseekError> for ApiError {
    fn from(e: WebseekError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "search request failed");
        let body = ErrorResponse {
            error: format!("Search failed: {}", self.0),
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

/// GET /search?q=<query>&page=<n>&page_size=<n>
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = params.page.filter(|&p| p >= 1).unwrap_or(1);
    let page_size = params
        .page_size
        .filter(|&s| (1..=MAX_PAGE_SIZE).contains(&s))
        .unwrap_or(DEFAULT_PAGE_SIZE);

    let outcome = state.engine.search(&params.q, page, page_size).await?;

    Ok(Json(SearchResponse {
        query: params.q,
        page,
        page_size,
        total: outcome.total,
        total_pages: (outcome.total + page_size - 1) / page_size,
        response_time: outcome.elapsed_seconds,
        results: outcome.results,
    }))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: crate::VERSION.to_string(),
    })
}
