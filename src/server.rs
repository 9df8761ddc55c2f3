//! JSON HTTP API over the engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check (returns version) |
//! | `GET`  | `/status` | Corpus counts, cache size, sync state |
//! | `POST` | `/chat` | Answer a question |
//! | `POST` | `/ingest` | Run a sync pass (crawl, documents, or meetings) |
//! | `POST` | `/cache/clear` | Drop every cached answer |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "a crawl is already in progress" } }
//! ```
//!
//! Codes: `bad_request` (400), `content_filter` (400), `conflict` (409),
//! `upstream` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the chat widget can be
//! embedded cross-origin.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::engine::Engine;
use crate::errors::EngineError;

/// Run the HTTP server until the process is terminated.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    let bind_addr = engine.config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/chat", post(handle_chat))
        .route("/ingest", post(handle_ingest))
        .route("/cache/clear", post(handle_cache_clear))
        .layer(cors)
        .with_state(engine);

    info!(addr = %bind_addr, "http server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let (status, code) = match &err {
            EngineError::ContentFilter => (StatusCode::BAD_REQUEST, "content_filter"),
            EngineError::Config(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            EngineError::CrawlInProgress | EngineError::MeetingRunInProgress => {
                (StatusCode::CONFLICT, "conflict")
            }
            EngineError::Fetch { .. }
            | EngineError::Embedding(_)
            | EngineError::Generation(_) => (StatusCode::BAD_GATEWAY, "upstream"),
            EngineError::StoreConsistency { .. } | EngineError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /status ============

async fn handle_status(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<crate::engine::EngineStatus>, AppError> {
    Ok(Json(engine.status().await?))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    language: Option<String>,
}

async fn handle_chat(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<crate::models::Answer>, AppError> {
    let answer = engine
        .pipeline
        .answer(&request.question, request.language.as_deref())
        .await?;
    Ok(Json(answer))
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    /// `crawl` (default), `documents`, or `meetings`.
    #[serde(default = "default_channel")]
    channel: String,
    /// Diff-bypassing rebuild; only meaningful for the crawl channel.
    #[serde(default)]
    full: bool,
}

fn default_channel() -> String {
    "crawl".to_string()
}

async fn handle_ingest(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<IngestRequest>,
) -> Result<Json<crate::ingest::SyncReport>, AppError> {
    let report = match request.channel.as_str() {
        "crawl" => engine.run_crawl(request.full).await?,
        "documents" => engine.sync_documents().await?,
        "meetings" => engine.sync_meetings().await?,
        other => {
            return Err(AppError {
                status: StatusCode::BAD_REQUEST,
                code: "bad_request",
                message: format!("unknown ingest channel: {}", other),
            })
        }
    };
    Ok(Json(report))
}

// ============ POST /cache/clear ============

#[derive(Serialize)]
struct CacheClearResponse {
    cleared: bool,
}

async fn handle_cache_clear(State(engine): State<Arc<Engine>>) -> Json<CacheClearResponse> {
    engine.pipeline.cache().clear();
    Json(CacheClearResponse { cleared: true })
}
