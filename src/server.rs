//! HTTP search API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/search?query=..&limit=..` | Ranked search |
//! | `POST` | `/search` | Same, with a JSON body `{"query": "..", "limit": 10}` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "index_not_built", "message": "..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `forbidden` (403), `search_failed` (500),
//! `index_not_built` (503).
//!
//! # Viewer gate
//!
//! When `[server].min_access_level` is set, callers must send an
//! `X-Mantis-Access-Level` header at or above it. The Mantis front end is
//! expected to stamp this header after its own login check.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use mantis_search_core::error::SearchError;
use mantis_search_core::search::SearchEngine;
use mantis_search_core::store::FragmentIndex;

use crate::config::{Config, MantisConfig, ServerConfig};
use crate::db;
use crate::pg_store::PgIndex;
use crate::search::SearchResponse;

pub const ACCESS_LEVEL_HEADER: &str = "x-mantis-access-level";

struct AppState<I> {
    engine: SearchEngine<I>,
    mantis: MantisConfig,
    min_access_level: Option<i64>,
}

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let engine = SearchEngine::new(Arc::new(PgIndex::new(pool, config)));
    let app = router(engine, &config.server, &config.mantis);

    info!(bind = %config.server.bind, "search server listening");
    println!("Search server listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the API router over any [`FragmentIndex`].
pub fn router<I>(engine: SearchEngine<I>, server: &ServerConfig, mantis: &MantisConfig) -> Router
where
    I: FragmentIndex + 'static,
{
    let state = Arc::new(AppState {
        engine,
        mantis: mantis.clone(),
        min_access_level: server.min_access_level,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", get(handle_search_get::<I>).post(handle_search_post::<I>))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::IndexNotBuilt => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "index_not_built", err.to_string())
            }
            SearchError::InvalidQuery(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "bad_request", err.to_string())
            }
            SearchError::Storage(_) => {
                warn!(error = %err, "search failed");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "search_failed", err.to_string())
            }
        }
    }
}

fn check_access(headers: &HeaderMap, min_level: Option<i64>) -> Result<(), AppError> {
    let Some(min) = min_level else {
        return Ok(());
    };
    let level = headers
        .get(ACCESS_LEVEL_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok());
    match level {
        Some(level) if level >= min => Ok(()),
        _ => Err(AppError::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            "access level too low to search",
        )),
    }
}

/// Limits arrive from forms and scripts; anything that is not an integer
/// falls back to the default.
fn lenient_limit(raw: Option<&Value>) -> Option<i64> {
    match raw? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /search ============

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: String,
    #[serde(default)]
    limit: Option<String>,
}

#[derive(Deserialize)]
struct SearchBody {
    #[serde(default)]
    query: String,
    #[serde(default)]
    limit: Option<Value>,
}

async fn run_query<I: FragmentIndex>(
    state: &AppState<I>,
    query: &str,
    limit: Option<i64>,
) -> Result<Json<SearchResponse>, AppError> {
    let results = state.engine.search(query, limit).await?;
    Ok(Json(SearchResponse::new(results, &state.mantis)))
}

async fn handle_search_get<I: FragmentIndex>(
    State(state): State<Arc<AppState<I>>>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    check_access(&headers, state.min_access_level)?;
    let limit = params.limit.and_then(|l| l.trim().parse().ok());
    run_query(&state, &params.query, limit).await
}

async fn handle_search_post<I: FragmentIndex>(
    State(state): State<Arc<AppState<I>>>,
    headers: HeaderMap,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, AppError> {
    check_access(&headers, state.min_access_level)?;
    let limit = lenient_limit(body.limit.as_ref());
    run_query(&state, &body.query, limit).await
}
