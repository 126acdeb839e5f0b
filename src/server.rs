//! HTTP API.
//!
//! Every endpoint except health is scoped by the caller's API key, sent in
//! the `X-API-Key` header. The key selects the active collection (a new key
//! replaces it, see [`CollectionManager`]) and is forwarded to the embedding
//! and generation providers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/health` | Liveness and collection status (no key needed) |
//! | `POST` | `/api/upload` | Multipart `file` field; extract, chunk, embed, index |
//! | `POST` | `/api/query` | Ranked, deduplicated passages for a query |
//! | `POST` | `/api/chat` | Answer streamed as server-sent events |
//! | `DELETE` | `/api/documents` | Empty the collection |
//! | `GET` | `/api/collection` | Collection diagnostics |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `unauthorized` (401), `bad_request` (400),
//! `payload_too_large` (413), `extraction_failed` (422),
//! `embedding_failed` (502), `key_validation_failed` (502),
//! `embeddings_disabled` (503), `index_error` (500), `internal` (500).
//!
//! Chat never fails once streaming has started: retrieval errors degrade to
//! an answer without documents, and generation errors end the stream with
//! the configured fallback message.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartError, DefaultBodyLimit, FromRequestParts, Multipart, State,
    },
    http::{request::Parts, StatusCode},
    response::{
        sse::{Event, KeepAlive, KeepAliveStream, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ragline_core::{
    dedupe, CollectionInfo, CollectionManager, ComposedContext, ContextComposer, CoreError,
    EmbeddingError, LifecycleState, RetrievalResult, SessionKey,
};

use crate::config::Config;
use crate::extract::{DocumentKind, ExtractError};
use crate::ingest::{ingest_bytes, IngestReport};
use crate::providers::{GeneratorFactory, KeyValidator, Providers};

const TRACING_TARGET: &str = "ragline::server";

/// Header carrying the caller's provider API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub collections: Arc<CollectionManager>,
    pub generators: Arc<dyn GeneratorFactory>,
    /// Checks new keys with the provider when `[auth].validate_keys` is on.
    pub validator: Option<Arc<dyn KeyValidator>>,
}

impl AppState {
    /// State backed by the HTTP providers described in `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let providers = Arc::new(Providers::new(config)?);
        let validator: Option<Arc<dyn KeyValidator>> = if config.auth.validate_keys {
            Some(providers.clone())
        } else {
            None
        };
        Ok(Self {
            config: Arc::new(config.clone()),
            collections: Arc::new(CollectionManager::new(providers.clone())),
            generators: providers,
            validator,
        })
    }

    /// The configured persona, or the request's `developer_message` when
    /// `[generation].allow_persona_override` is on.
    fn composer(&self, developer_message: Option<&str>) -> ContextComposer {
        let generation = &self.config.generation;
        let prompt = developer_message
            .filter(|_| generation.allow_persona_override)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(generation.system_prompt.as_str());
        ContextComposer::new(prompt).with_fallback(generation.fallback_message.clone())
    }

    fn maybe_dedupe(&self, results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        if self.config.retrieval.dedupe {
            dedupe(results)
        } else {
            results
        }
    }
}

/// Build the router with all routes and middleware.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.config.server.max_upload_bytes);

    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/upload", post(handle_upload))
        .route("/api/query", post(handle_query))
        .route("/api/chat", post(handle_chat))
        .route("/api/documents", delete(handle_clear_documents))
        .route("/api/collection", get(handle_collection))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated. Returns an error if the upload
/// directory cannot be created or the address cannot be bound.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    tokio::fs::create_dir_all(&config.server.upload_dir).await?;
    if !config.embedding.is_enabled() {
        tracing::warn!(
            target: TRACING_TARGET,
            "embedding provider is disabled, uploads and queries will be rejected"
        );
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        target: TRACING_TARGET,
        addr = %listener.local_addr()?,
        embedding = %config.embedding.provider,
        model = %config.generation.model,
        "server listening"
    );

    axum::serve(listener, router(state)).await?;
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

/// Error type that converts into the JSON error contract.
#[derive(Debug)]
pub struct AppError {
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn internal(err: impl std::fmt::Display) -> AppError {
    tracing::error!(target: TRACING_TARGET, error = %err, "request failed");
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        err.to_string(),
    )
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::Embedding(EmbeddingError::Disabled) => AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "embeddings_disabled",
                err.to_string(),
            ),
            CoreError::Embedding(_) => {
                tracing::warn!(target: TRACING_TARGET, error = %err, "embedding provider failed");
                AppError::new(StatusCode::BAD_GATEWAY, "embedding_failed", err.to_string())
            }
            _ => {
                tracing::error!(target: TRACING_TARGET, error = %err, "index operation failed");
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "index_error",
                    err.to_string(),
                )
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        let status = err.status();
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "payload_too_large"
        } else {
            "bad_request"
        };
        AppError::new(status, code, err.body_text())
    }
}

/// Map an ingestion failure to the most specific error code.
fn ingest_error(err: anyhow::Error) -> AppError {
    if let Some(extract) = err.downcast_ref::<ExtractError>() {
        return match extract {
            ExtractError::UnsupportedFileType(_) => bad_request(extract.to_string()),
            _ => AppError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "extraction_failed",
                extract.to_string(),
            ),
        };
    }
    match err.downcast::<CoreError>() {
        Ok(core) => core.into(),
        Err(other) => internal(format!("{:#}", other)),
    }
}

// ============ API key extraction ============

/// The caller's key, taken from the `X-API-Key` header.
pub struct ApiKey(pub SessionKey);

impl FromRequestParts<AppState> for ApiKey {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| unauthorized("API key is missing. Send it in the X-API-Key header."))?;
        let key = SessionKey::new(raw);

        if let Some(validator) = &state.validator {
            match validator.validate(&key).await {
                Ok(true) => {}
                Ok(false) => return Err(unauthorized("Invalid API key.")),
                Err(err) => {
                    tracing::warn!(
                        target: TRACING_TARGET,
                        key = %key.fingerprint(),
                        error = %err,
                        "api key validation failed"
                    );
                    return Err(AppError::new(
                        StatusCode::BAD_GATEWAY,
                        "key_validation_failed",
                        format!("Could not validate API key: {}", err),
                    ));
                }
            }
        }

        Ok(ApiKey(key))
    }
}

// ============ GET /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    services: HealthServices,
}

#[derive(Serialize)]
struct HealthServices {
    vector_store: &'static str,
    documents: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (vector_store, documents) = match state.collections.state() {
        LifecycleState::Active(_) => (
            "active",
            state.collections.current().map(|c| c.len()).unwrap_or(0),
        ),
        LifecycleState::Uninitialized => ("not_initialized", 0),
    };
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now(),
        services: HealthServices {
            vector_store,
            documents,
        },
    })
}

// ============ POST /api/upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    filename: String,
    pages: usize,
    chunks: usize,
    document_count: usize,
}

impl From<IngestReport> for UploadResponse {
    fn from(report: IngestReport) -> Self {
        Self {
            message: "File processed successfully".to_string(),
            filename: report.file_name,
            pages: report.pages,
            chunks: report.chunks,
            document_count: report.document_count,
        }
    }
}

async fn handle_upload(
    State(state): State<AppState>,
    ApiKey(key): ApiKey,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(base_name)
            .ok_or_else(|| bad_request("the 'file' field has no file name"))?;
        let bytes = field.bytes().await?;
        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) =
        upload.ok_or_else(|| bad_request("multipart field 'file' is required"))?;
    if bytes.is_empty() {
        return Err(bad_request("uploaded file is empty"));
    }
    DocumentKind::from_file_name(&file_name).map_err(|e| bad_request(e.to_string()))?;

    save_upload(&state.config.server.upload_dir, &file_name, &bytes)
        .await
        .map_err(|e| internal(format!("{:#}", e)))?;

    let collection = state.collections.acquire(&key);
    let report = ingest_bytes(&state.config, &collection, &file_name, bytes)
        .await
        .map_err(ingest_error)?;

    tracing::info!(
        target: TRACING_TARGET,
        key = %key.fingerprint(),
        file_name = %report.file_name,
        chunks = report.chunks,
        "upload indexed"
    );
    Ok(Json(report.into()))
}

/// Strip any directory components a client put in the file name.
fn base_name(raw: &str) -> String {
    raw.rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or("upload")
        .to_string()
}

async fn save_upload(dir: &Path, file_name: &str, bytes: &[u8]) -> anyhow::Result<()> {
    use anyhow::Context;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to save upload to {}", path.display()))
}

// ============ POST /api/query ============

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<RetrievalResult>,
    pub query: String,
}

async fn handle_query(
    State(state): State<AppState>,
    ApiKey(key): ApiKey,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let retrieval = &state.config.retrieval;
    let limit = request.limit.unwrap_or(retrieval.query_limit);
    let threshold = request
        .score_threshold
        .unwrap_or(retrieval.query_score_threshold);

    let results = state
        .collections
        .acquire(&key)
        .pipeline()
        .search(&request.query, limit, threshold)
        .await?;
    let results = state.maybe_dedupe(results);

    Ok(Json(QueryResponse {
        results,
        query: request.query,
    }))
}

// ============ POST /api/chat ============

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_message: String,
    /// Replaces the configured persona only when
    /// `[generation].allow_persona_override` is set.
    #[serde(default)]
    pub developer_message: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

type EventStream = ReceiverStream<Result<Event, Infallible>>;

async fn handle_chat(
    State(state): State<AppState>,
    ApiKey(key): ApiKey,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<KeepAliveStream<EventStream>>, AppError> {
    if request.user_message.trim().is_empty() {
        return Err(bad_request("user_message must not be empty"));
    }

    let retrieval = &state.config.retrieval;
    let composer = state.composer(request.developer_message.as_deref());
    let context = match state
        .collections
        .acquire(&key)
        .pipeline()
        .search(
            &request.user_message,
            retrieval.chat_limit,
            retrieval.chat_score_threshold,
        )
        .await
    {
        Ok(results) => composer.compose(&state.maybe_dedupe(results)),
        Err(err) => {
            tracing::warn!(
                target: TRACING_TARGET,
                error = %err,
                "retrieval failed, answering without documents"
            );
            ComposedContext::RetrievalFailed
        }
    };

    let generator = state
        .generators
        .generator_for(&key, request.model.as_deref());
    let mut answer = composer.answer(generator, &context, &request.user_message);
    let with_documents = context.has_passages();

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(32);
    tokio::spawn(async move {
        let mut fragments = 0usize;
        loop {
            tokio::select! {
                _ = tx.closed() => {
                    tracing::info!(
                        target: TRACING_TARGET,
                        fragments,
                        "client disconnected, generation cancelled"
                    );
                    return;
                }
                next = answer.next() => match next {
                    Some(fragment) => {
                        fragments += 1;
                        // SSE fields cannot carry carriage returns.
                        let event = Event::default().data(fragment.replace('\r', ""));
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    None => break,
                },
            }
        }
        tracing::debug!(
            target: TRACING_TARGET,
            fragments,
            with_documents,
            "chat stream completed"
        );
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

// ============ DELETE /api/documents ============

#[derive(Serialize)]
struct DetailResponse {
    detail: &'static str,
}

async fn handle_clear_documents(
    State(state): State<AppState>,
    ApiKey(key): ApiKey,
) -> Json<DetailResponse> {
    state.collections.clear(&key);
    Json(DetailResponse {
        detail: "Documents cleared successfully.",
    })
}

// ============ GET /api/collection ============

async fn handle_collection(
    State(state): State<AppState>,
    ApiKey(key): ApiKey,
) -> Json<CollectionInfo> {
    Json(state.collections.acquire(&key).info())
}
