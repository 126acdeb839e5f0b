//! HTTP API tests against a live server on an ephemeral port.
//!
//! Embeddings come from a word-count embedder and completions from a
//! scripted generator, so no network provider is involved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use ragline::config::Config;
use ragline::providers::{GeneratorFactory, KeyValidator};
use ragline::server::{router, AppState, QueryResponse};
use ragline_core::compose::{DEFAULT_FALLBACK, NO_RELEVANT_DOCUMENTS};
use ragline_core::{
    CollectionManager, EmbedderFactory, EmbeddingError, EmbeddingProvider, FragmentStream,
    GenerationError, GenerationPort, SessionKey,
};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tempfile::TempDir;

const VOCAB: [&str; 5] = ["rust", "ownership", "borrow", "invoice", "holiday"];

struct VocabEmbedder;

#[async_trait]
impl EmbeddingProvider for VocabEmbedder {
    fn model_name(&self) -> &str {
        "vocab"
    }
    fn dims(&self) -> Option<usize> {
        Some(VOCAB.len())
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let lower = text.to_lowercase();
        Ok(VOCAB
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect())
    }
}

struct VocabFactory;

impl EmbedderFactory for VocabFactory {
    fn embedder_for(&self, _key: &SessionKey) -> Arc<dyn EmbeddingProvider> {
        Arc::new(VocabEmbedder)
    }
}

/// Answers "with-docs" or "no-docs" depending on the context it receives,
/// and "pirate" when the persona asks for one.
struct ScriptedGenerator {
    broken: bool,
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Emits a fragment every few milliseconds until its stream is dropped.
struct EndlessGenerator {
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl GenerationPort for EndlessGenerator {
    async fn generate(
        &self,
        _system_context: &str,
        _user_message: &str,
    ) -> Result<FragmentStream, GenerationError> {
        let guard = DropFlag(self.dropped.clone());
        Ok(stream::unfold(guard, |guard| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Some((Ok::<_, GenerationError>("tick".to_string()), guard))
        })
        .boxed())
    }
}

#[async_trait]
impl GenerationPort for ScriptedGenerator {
    async fn generate(
        &self,
        system_context: &str,
        _user_message: &str,
    ) -> Result<FragmentStream, GenerationError> {
        if self.broken {
            return Err(GenerationError::Request("model unavailable".into()));
        }
        let verdict = if system_context.contains(NO_RELEVANT_DOCUMENTS) {
            "no-docs"
        } else {
            "with-docs"
        };
        let persona = if system_context.starts_with("Speak like a pirate") {
            "pirate"
        } else {
            "plain"
        };
        let fragments: Vec<Result<String, GenerationError>> = vec![
            Ok("answer:".to_string()),
            Ok(verdict.to_string()),
            Ok(persona.to_string()),
        ];
        Ok(Box::pin(stream::iter(fragments)))
    }
}

struct ScriptedFactory {
    endless_dropped: Arc<AtomicBool>,
}

impl GeneratorFactory for ScriptedFactory {
    fn generator_for(&self, _key: &SessionKey, model: Option<&str>) -> Arc<dyn GenerationPort> {
        if model == Some("endless") {
            return Arc::new(EndlessGenerator {
                dropped: self.endless_dropped.clone(),
            });
        }
        Arc::new(ScriptedGenerator {
            broken: model == Some("broken"),
        })
    }
}

struct AllowList(&'static str);

#[async_trait]
impl KeyValidator for AllowList {
    async fn validate(&self, key: &SessionKey) -> anyhow::Result<bool> {
        Ok(key.expose() == self.0)
    }
}

struct TestApp {
    base: String,
    client: reqwest::Client,
    uploads: TempDir,
    endless_dropped: Arc<AtomicBool>,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn upload(&self, key: &str, file_name: &str, body: &str) -> reqwest::Response {
        let part = Part::bytes(body.as_bytes().to_vec()).file_name(file_name.to_string());
        self.client
            .post(self.url("/api/upload"))
            .header("X-API-Key", key)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .unwrap()
    }

    async fn query(&self, key: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/query"))
            .header("X-API-Key", key)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn chat_response(&self, key: &str, body: Value) -> reqwest::Response {
        let resp = self
            .client
            .post(self.url("/api/chat"))
            .header("X-API-Key", key)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp
    }

    async fn chat(&self, key: &str, body: Value) -> String {
        self.chat_response(key, body).await.text().await.unwrap()
    }

    async fn health(&self) -> Value {
        self.client
            .get(self.url("/api/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

fn test_config(uploads: &TempDir) -> Config {
    let mut config = Config::minimal();
    config.server.upload_dir = uploads.path().to_path_buf();
    config.chunking.chunk_size = 8;
    config.chunking.chunk_overlap = 0.0;
    config.retrieval.chat_score_threshold = 0.1;
    config
}

async fn spawn_app_with(
    configure: impl FnOnce(&mut Config),
    validator: Option<Arc<dyn KeyValidator>>,
) -> TestApp {
    let uploads = TempDir::new().unwrap();
    let mut config = test_config(&uploads);
    configure(&mut config);

    let endless_dropped = Arc::new(AtomicBool::new(false));
    let state = AppState {
        config: Arc::new(config),
        collections: Arc::new(CollectionManager::new(Arc::new(VocabFactory))),
        generators: Arc::new(ScriptedFactory {
            endless_dropped: endless_dropped.clone(),
        }),
        validator,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    TestApp {
        base: format!("http://{}", addr),
        client: reqwest::Client::new(),
        uploads,
        endless_dropped,
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}, None).await
}

const NOTES: &str = "Rust ownership rules.\n\nHoliday invoice pending.";

#[tokio::test]
async fn test_health_reports_collection_state() {
    let app = spawn_app().await;

    let health = app.health().await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["services"]["vector_store"], "not_initialized");
    assert!(health["timestamp"].is_string());

    let resp = app.upload("key-a", "notes.txt", NOTES).await;
    assert_eq!(resp.status(), 200);

    let health = app.health().await;
    assert_eq!(health["services"]["vector_store"], "active");
    assert_eq!(health["services"]["documents"], 2);
}

#[tokio::test]
async fn test_missing_key_is_unauthorized() {
    let app = spawn_app().await;
    let resp = app
        .client
        .post(app.url("/api/query"))
        .json(&serde_json::json!({ "query": "rust" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn test_upload_then_query() {
    let app = spawn_app().await;

    let resp = app.upload("key-a", "notes.txt", NOTES).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "File processed successfully");
    assert_eq!(body["filename"], "notes.txt");
    assert_eq!(body["chunks"], 2);

    let resp = app
        .query("key-a", serde_json::json!({ "query": "rust ownership" }))
        .await;
    assert_eq!(resp.status(), 200);
    let body: QueryResponse = resp.json().await.unwrap();
    assert_eq!(body.query, "rust ownership");
    assert_eq!(body.results.len(), 1);
    assert_eq!(body.results[0].text, "Rust ownership rules.");
    assert_eq!(body.results[0].metadata.file_name.as_deref(), Some("notes.txt"));
    assert_eq!(body.results[0].metadata.page_label.as_deref(), Some("1"));
    assert!(body.results[0].score > 0.99);

    assert!(app.uploads.path().join("notes.txt").exists());
}

#[tokio::test]
async fn test_query_deduplicates_repeated_passages() {
    let app = spawn_app().await;
    let text = "Rust ownership rules. Rust ownership rules. Rust ownership rules.";
    let resp = app.upload("key-a", "repeat.md", text).await;
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["chunks"], 3);

    let body: QueryResponse = app
        .query("key-a", serde_json::json!({ "query": "ownership", "limit": 10 }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body.results.len(), 1);
}

#[tokio::test]
async fn test_query_threshold_and_limit_overrides() {
    let app = spawn_app().await;
    app.upload("key-a", "notes.txt", NOTES).await;

    // "rust invoice" half-matches both chunks (cosine ~0.5 each).
    let body: QueryResponse = app
        .query("key-a", serde_json::json!({ "query": "rust invoice" }))
        .await
        .json()
        .await
        .unwrap();
    assert!(body.results.is_empty());

    let body: QueryResponse = app
        .query(
            "key-a",
            serde_json::json!({ "query": "rust invoice", "score_threshold": 0.3, "limit": 1 }),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body.results.len(), 1);
}

#[tokio::test]
async fn test_empty_query_is_bad_request() {
    let app = spawn_app().await;
    let resp = app.query("key-a", serde_json::json!({ "query": "  " })).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_unsupported_upload_is_rejected() {
    let app = spawn_app().await;
    let resp = app.upload("key-a", "sheet.xlsx", "a,b,c").await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = app.upload("key-a", "empty.txt", "").await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_upload_replaces_previous_document() {
    let app = spawn_app().await;
    app.upload("key-a", "notes.txt", NOTES).await;
    app.upload("key-a", "other.txt", "Borrow checker.").await;

    let body: QueryResponse = app
        .query("key-a", serde_json::json!({ "query": "rust ownership" }))
        .await
        .json()
        .await
        .unwrap();
    assert!(body.results.is_empty());

    let info: Value = app
        .client
        .get(app.url("/api/collection"))
        .header("X-API-Key", "key-a")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["document_count"], 1);
    assert_eq!(info["embedding_model"], "vocab");
}

#[tokio::test]
async fn test_chat_streams_fragments_with_context() {
    let app = spawn_app().await;
    app.upload("key-a", "notes.txt", NOTES).await;

    let body = app
        .chat("key-a", serde_json::json!({ "user_message": "What about rust ownership?" }))
        .await;
    assert!(body.contains("data:"));
    assert!(body.contains("answer:"));
    assert!(body.contains("with-docs"));
    assert!(!body.contains("no-docs"));
}

#[tokio::test]
async fn test_chat_without_documents_uses_sentinel() {
    let app = spawn_app().await;
    let body = app
        .chat("key-a", serde_json::json!({ "user_message": "Anything?" }))
        .await;
    assert!(body.contains("no-docs"));
}

#[tokio::test]
async fn test_chat_generation_failure_yields_fallback() {
    let app = spawn_app().await;
    let body = app
        .chat(
            "key-a",
            serde_json::json!({ "user_message": "Hello", "model": "broken" }),
        )
        .await;
    assert!(body.contains(DEFAULT_FALLBACK));
    assert_eq!(body.matches(DEFAULT_FALLBACK).count(), 1);
}

#[tokio::test]
async fn test_client_disconnect_stops_generation() {
    let app = spawn_app().await;
    let resp = app
        .chat_response(
            "key-a",
            serde_json::json!({ "user_message": "Hello", "model": "endless" }),
        )
        .await;

    let mut body = Box::pin(resp.bytes_stream());
    let first = body.next().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("tick"));
    assert!(!app.endless_dropped.load(Ordering::SeqCst));
    drop(body);

    for _ in 0..100 {
        if app.endless_dropped.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("provider stream still alive after the client went away");
}

#[tokio::test]
async fn test_developer_message_ignored_by_default() {
    let app = spawn_app().await;
    let body = app
        .chat(
            "key-a",
            serde_json::json!({
                "user_message": "Hello",
                "developer_message": "Speak like a pirate."
            }),
        )
        .await;
    assert!(body.contains("plain"));
    assert!(!body.contains("pirate"));
}

#[tokio::test]
async fn test_developer_message_replaces_persona_when_allowed() {
    let app = spawn_app_with(|c| c.generation.allow_persona_override = true, None).await;
    let body = app
        .chat(
            "key-a",
            serde_json::json!({
                "user_message": "Hello",
                "developer_message": "Speak like a pirate."
            }),
        )
        .await;
    assert!(body.contains("pirate"));

    // A blank override keeps the configured persona.
    let body = app
        .chat(
            "key-a",
            serde_json::json!({ "user_message": "Hello", "developer_message": "   " }),
        )
        .await;
    assert!(body.contains("plain"));
}

#[tokio::test]
async fn test_delete_documents_clears_collection() {
    let app = spawn_app().await;
    app.upload("key-a", "notes.txt", NOTES).await;

    let resp = app
        .client
        .delete(app.url("/api/documents"))
        .header("X-API-Key", "key-a")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "Documents cleared successfully.");

    let body: QueryResponse = app
        .query("key-a", serde_json::json!({ "query": "rust ownership" }))
        .await
        .json()
        .await
        .unwrap();
    assert!(body.results.is_empty());
}

#[tokio::test]
async fn test_new_key_starts_fresh_collection() {
    let app = spawn_app().await;
    app.upload("key-a", "notes.txt", NOTES).await;

    let body: QueryResponse = app
        .query("key-b", serde_json::json!({ "query": "rust ownership" }))
        .await
        .json()
        .await
        .unwrap();
    assert!(body.results.is_empty());

    // The first key's documents were dropped with its collection.
    let body: QueryResponse = app
        .query("key-a", serde_json::json!({ "query": "rust ownership" }))
        .await
        .json()
        .await
        .unwrap();
    assert!(body.results.is_empty());
}

#[tokio::test]
async fn test_validator_rejects_unknown_keys() {
    let app = spawn_app_with(|_| {}, Some(Arc::new(AllowList("good-key")))).await;

    let resp = app.query("bad-key", serde_json::json!({ "query": "rust" })).await;
    assert_eq!(resp.status(), 401);

    let resp = app.query("good-key", serde_json::json!({ "query": "rust" })).await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let app = spawn_app_with(|c| c.server.max_upload_bytes = 64, None).await;
    let resp = app.upload("key-a", "big.txt", &"rust ".repeat(100)).await;
    assert_eq!(resp.status(), 413);
}
