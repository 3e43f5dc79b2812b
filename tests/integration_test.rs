/// End-to-end tests for the embedding service.
///
/// Drives the axum router in-process:
///   health → preload → embeddings, with a stub downloader and mock models.
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use embedserve::api::handlers::{EmbeddingResponse, ErrorResponse};
use embedserve::api::server::{AppState, router};
use embedserve::cache::ModelCache;
use embedserve::config::Config;
use embedserve::embedder::download::{GgufFileDetails, ModelDownloader};
use embedserve::embedder::mock::MockEmbedder;
use embedserve::embedder::tokenizer::WordPieceTokenizer;
use embedserve::embedder::vocab::Vocabulary;
use embedserve::embedder::{Embedder, EmbedderError};
use embedserve::preload::Preloader;
use serde_json::json;
use tempfile::tempdir;
use tower::ServiceExt;

/// Serves a fixed vocabulary and fake weights, recording every request.
#[derive(Default)]
struct StubDownloader {
    requests: Arc<Mutex<Vec<String>>>,
}

impl ModelDownloader for StubDownloader {
    async fn list_gguf_files(
        &self,
        model_id: &str,
        _api_key: Option<&str>,
    ) -> Result<Vec<GgufFileDetails>, EmbedderError> {
        self.requests.lock().unwrap().push(format!("list {model_id}"));
        Ok(Vec::new())
    }

    async fn download_file(
        &self,
        model_id: &str,
        remote_filename: &str,
        local_path: &Path,
        _api_key: Option<&str>,
    ) -> Result<(), EmbedderError> {
        self.requests
            .lock()
            .unwrap()
            .push(format!("get {model_id}/{remote_filename}"));
        let body = if remote_filename.ends_with("vocab.txt") {
            // No [UNK]: the load must fail with a vocabulary error.
            "[CLS]\n[SEP]\n[PAD]\nhello\n"
        } else {
            "not a model"
        };
        fs::write(local_path, body).unwrap();
        Ok(())
    }
}

struct Harness {
    app: Router,
    cache: Arc<ModelCache>,
    requests: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempdir().unwrap();
    let config = Config {
        model_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let downloader = StubDownloader::default();
    let requests = downloader.requests.clone();
    let cache = Arc::new(ModelCache::new());
    let preloader = Preloader::new(cache.clone(), downloader, Arc::new(config));

    Harness {
        app: router(AppState::new(preloader)),
        cache,
        requests,
        _dir: dir,
    }
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorResponse>(body).unwrap().error
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, br#""Service is running!""#);
}

#[tokio::test]
async fn test_embeddings_before_preload() {
    let h = harness();
    let (status, body) = post_json(&h.app, "/embeddings", json!({"Texts": ["hello"]})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("not loaded"));
    assert!(!h.cache.is_loaded());
}

#[tokio::test]
async fn test_preload_unsupported_format() {
    let h = harness();
    let (status, body) = post_json(
        &h.app,
        "/preload",
        json!({"ModelId": "org/model", "ModelFormat": "xyz"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("unsupported model format"));
    assert!(h.requests.lock().unwrap().is_empty(), "no download attempted");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        Request::builder()
            .method("POST")
            .uri("/preload")
            .header("content-type", "application/json")
            .body(Body::from("{ nope"))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).starts_with("invalid request"));
}

#[tokio::test]
async fn test_embeddings_with_loaded_model() {
    let h = harness();
    h.cache.install(Arc::new(MockEmbedder::new(16)));

    let (status, body) = post_json(
        &h.app,
        "/embeddings",
        json!({"Texts": ["first", "second", "first"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response: EmbeddingResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.embeddings.len(), 3);
    assert!(response.embeddings.iter().all(|v| v.len() == 16));
    assert_eq!(response.embeddings[0], response.embeddings[2]);
    assert_ne!(response.embeddings[0], response.embeddings[1]);

    let expected = MockEmbedder::new(16).embed("second").unwrap();
    assert_eq!(response.embeddings[1], expected);
}

#[tokio::test]
async fn test_failed_preload_keeps_previous_model() {
    let h = harness();
    h.cache.install(Arc::new(MockEmbedder::new(8)));

    let (status, body) = post_json(
        &h.app,
        "/preload",
        json!({"ModelId": "org/minilm", "ModelFormat": "onnx"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("[UNK]"));
    assert_eq!(
        *h.requests.lock().unwrap(),
        vec!["get org/minilm/model.onnx", "get org/minilm/vocab.txt"]
    );

    // The previous model keeps serving.
    let (status, body) = post_json(&h.app, "/embeddings", json!({"Texts": ["still here"]})).await;
    assert_eq!(status, StatusCode::OK);
    let response: EmbeddingResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(response.embeddings[0].len(), 8);
}

#[tokio::test]
async fn test_gguf_preload_with_empty_listing() {
    let h = harness();
    let (status, body) = post_json(
        &h.app,
        "/preload",
        json!({"ModelId": "org/llama", "ModelFormat": "GGUF"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("no .gguf files"));
    assert_eq!(*h.requests.lock().unwrap(), vec!["list org/llama"]);
    assert!(!h.cache.is_loaded());
}

/// WordPiece behaviour on a tiny vocabulary, through the public API.
#[test]
fn test_wordpiece_scenario() {
    let vocab = Vocabulary::from_lines([
        "[CLS]", "[SEP]", "[PAD]", "[UNK]", "hello", "world", "##lo",
    ]);
    let tokenizer = WordPieceTokenizer::new(vocab).unwrap().with_max_length(10);

    let out = tokenizer.tokenize("hello worldxlo");
    assert_eq!(out.input_ids, vec![0, 4, 3, 1]);
    assert_eq!(out.attention_mask, vec![1, 1, 1, 1]);

    let out = tokenizer.tokenize("hello");
    assert_eq!(out.input_ids, vec![0, 4, 1]);
}
