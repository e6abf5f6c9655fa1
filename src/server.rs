//! HTTP front end for the query service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/query` | Answer a question from the indexed docs |
//! | `POST` | `/reindex` | Rebuild the index from disk and swap it in |
//! | `GET`  | `/stats` | Size and provenance of the served index |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400, including unparseable request bodies),
//! `embedding_error` (502), `index_error` (500), `internal` (500).
//!
//! A failed completion is not an error: `/query` answers `200` with a
//! context-only answer and `"degraded": true`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser UI can call
//! the API directly.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::builder::build_index;
use crate::completion::fallback_answer;
use crate::config::Config;
use crate::error::QueryError;
use crate::models::RetrievedChunk;
use crate::progress::NoProgress;
use crate::query::QueryService;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    service: Arc<QueryService>,
    /// Serializes rebuilds; queries never take it.
    rebuild: Arc<Mutex<()>>,
}

/// Build the router. Split out from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn router(config: Arc<Config>, service: Arc<QueryService>) -> Router {
    let state = AppState {
        config,
        service,
        rebuild: Arc::new(Mutex::new(())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(handle_query))
        .route("/reindex", post(handle_reindex))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: Arc<Config>, service: Arc<QueryService>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(config, service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "query service listening");
    axum::serve(listener, app).await?;

    Ok(())
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        let message = err.to_string();
        match err {
            QueryError::InvalidQuery => bad_request(message),
            QueryError::Embedding { .. } => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "embedding_error",
                message,
            },
            QueryError::Index { .. } => AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "index_error",
                message,
            },
            QueryError::Completion { .. } => internal(message),
        }
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

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    query: String,
    answer: String,
    sources: Vec<RetrievedChunk>,
    /// `true` when the answer was assembled from context because the LLM failed.
    degraded: bool,
}

/// Returns `400` for a malformed body, a blank question, or `top_k == 0`.
async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(req) = payload.map_err(|rejection| bad_request(rejection.body_text()))?;
    let k = req.top_k.unwrap_or(state.service.options().top_k);
    if k == 0 {
        return Err(bad_request("top_k must be at least 1"));
    }

    match state.service.query_with_k(&req.question, k).await {
        Ok(result) => Ok(Json(QueryResponse {
            query: result.query,
            answer: result.answer,
            sources: result.retrieved,
            degraded: false,
        })),
        Err(QueryError::Completion { retrieved, .. }) => {
            let query = req.question.trim().to_string();
            Ok(Json(QueryResponse {
                answer: fallback_answer(&query, &retrieved),
                query,
                sources: retrieved,
                degraded: true,
            }))
        }
        Err(e) => Err(e.into()),
    }
}

// ============ POST /reindex ============

#[derive(Serialize)]
struct ReindexResponse {
    documents: usize,
    chunks: usize,
    dims: usize,
    changed: usize,
    removed: usize,
    elapsed_ms: u64,
}

/// Rebuild from `[docs]` and swap. Queries keep being answered from the old
/// snapshot until the new one is complete; a failed rebuild leaves it served.
async fn handle_reindex(State(state): State<AppState>) -> Result<Json<ReindexResponse>, AppError> {
    let _guard = state.rebuild.lock().await;

    let provider = state.service.embedder().clone();
    let (kb, report) = build_index(&state.config, provider.as_ref(), &NoProgress)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "reindex failed");
            internal(format!("{:#}", e))
        })?;
    state.service.replace_index(kb);

    Ok(Json(ReindexResponse {
        documents: report.documents,
        chunks: report.chunks,
        dims: report.dims,
        changed: report.changed,
        removed: report.removed,
        elapsed_ms: report.elapsed.as_millis() as u64,
    }))
}

// ============ GET /stats ============

#[derive(Serialize)]
struct StatsResponse {
    chunks: usize,
    dims: usize,
    model: String,
    built_at: Option<DateTime<Utc>>,
}

async fn handle_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let kb = state.service.index().snapshot();
    Json(StatsResponse {
        chunks: kb.len(),
        dims: kb.index().dims(),
        model: kb.model_name().to_string(),
        built_at: (!kb.is_empty()).then(|| kb.built_at()),
    })
}
