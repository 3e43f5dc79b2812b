/// Route handlers and the embedding request flow.
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::server::AppState;
use crate::cache::ModelCache;
use crate::embedder::EmbedderError;
use crate::embedder::download::ModelDownloader;
use crate::preload::ModelDescriptor;

// ── Request / response bodies ────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmbeddingRequest {
    #[serde(default)]
    pub texts: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PreloadResponse {
    pub message: String,
    pub model_format: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorResponse {
    pub error: String,
}

// ── Errors ───────────────────────────────────────────────────────────

/// Every failure is reported as `400` with a JSON message.
#[derive(Debug)]
pub enum ApiError {
    Embedder(EmbedderError),
    BadRequest(String),
}

impl From<EmbedderError> for ApiError {
    fn from(e: EmbedderError) -> Self {
        Self::Embedder(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = match self {
            Self::Embedder(e) => e.to_string(),
            Self::BadRequest(msg) => format!("invalid request: {msg}"),
        };
        (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
    }
}

// ── Embedding flow ───────────────────────────────────────────────────

/// Embed `texts` in order with the active model.
///
/// All-or-nothing: the first failing text aborts the batch. Inference runs
/// on the blocking pool against the embedder that was active when the call
/// started.
pub async fn get_embeddings(
    cache: &ModelCache,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let embedder = cache.current()?;

    let embeddings = tokio::task::spawn_blocking(move || {
        texts
            .iter()
            .map(|text| embedder.embed(text))
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| EmbedderError::Inference(format!("embedding task failed: {e}")))??;

    if let Some(first) = embeddings.first() {
        let dims = first.len();
        if let Some(bad) = embeddings.iter().position(|v| v.len() != dims) {
            return Err(EmbedderError::Inference(format!(
                "embedding {bad} has {} dimensions, expected {dims}",
                embeddings[bad].len()
            )));
        }
    }

    Ok(embeddings)
}

// ── Handlers ─────────────────────────────────────────────────────────

pub async fn health() -> Json<&'static str> {
    Json("Service is running!")
}

pub async fn preload<D: ModelDownloader + 'static>(
    State(state): State<AppState<D>>,
    payload: Result<Json<ModelDescriptor>, JsonRejection>,
) -> Result<Json<PreloadResponse>, ApiError> {
    let Json(descriptor) = payload?;
    info!(
        "Received preload request for {} ({})",
        descriptor.model_id.as_deref().unwrap_or("<local>"),
        descriptor.model_format
    );

    let format = state.preloader.preload(&descriptor).await?;

    Ok(Json(PreloadResponse {
        message: "Model preloaded successfully!".to_string(),
        model_format: format.to_string(),
    }))
}

pub async fn embeddings<D: ModelDownloader + 'static>(
    State(state): State<AppState<D>>,
    payload: Result<Json<EmbeddingRequest>, JsonRejection>,
) -> Result<Json<EmbeddingResponse>, ApiError> {
    let Json(request) = payload?;
    let count = request.texts.len();

    let embeddings = get_embeddings(&state.cache, request.texts)
        .await
        .inspect_err(|e| warn!("Embedding request for {count} texts failed: {e}"))?;

    Ok(Json(EmbeddingResponse { embeddings }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::Embedder;
    use crate::embedder::mock::MockEmbedder;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns `[i]` for the i-th call.
    #[derive(Default)]
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedderError> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![i as f32])
        }
    }

    /// Fails on a given text, counting every call.
    struct FailingEmbedder {
        fail_on: &'static str,
        calls: AtomicUsize,
    }

    impl Embedder for FailingEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text == self.fail_on {
                Err(EmbedderError::Inference(format!("cannot embed {text}")))
            } else {
                Ok(vec![1.0, 2.0])
            }
        }
    }

    struct RaggedEmbedder;

    impl Embedder for RaggedEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            Ok(vec![0.0; text.len()])
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_not_loaded() {
        let cache = ModelCache::new();
        let err = get_embeddings(&cache, texts(&["a"])).await.unwrap_err();
        assert!(matches!(err, EmbedderError::NotLoaded));
        assert!(!cache.is_loaded());
    }

    #[tokio::test]
    async fn test_preserves_order() {
        let cache = ModelCache::new();
        cache.install(Arc::new(CountingEmbedder::default()));

        let result = get_embeddings(&cache, texts(&["a", "b"])).await.unwrap();
        assert_eq!(result, vec![vec![0.0], vec![1.0]]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let cache = ModelCache::new();
        cache.install(Arc::new(MockEmbedder::new(8)));

        let result = get_embeddings(&cache, Vec::new()).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_first_failure_aborts() {
        let cache = ModelCache::new();
        let embedder = Arc::new(FailingEmbedder {
            fail_on: "bad",
            calls: AtomicUsize::new(0),
        });
        cache.install(embedder.clone());

        let err = get_embeddings(&cache, texts(&["ok", "bad", "never"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedderError::Inference(_)));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        // The cached model survives a failed request.
        assert!(cache.is_loaded());
        let ok = get_embeddings(&cache, texts(&["ok"])).await.unwrap();
        assert_eq!(ok, vec![vec![1.0, 2.0]]);
    }

    #[tokio::test]
    async fn test_ragged_dimensions_rejected() {
        let cache = ModelCache::new();
        cache.install(Arc::new(RaggedEmbedder));

        let err = get_embeddings(&cache, texts(&["ab", "abc"])).await.unwrap_err();
        assert!(matches!(err, EmbedderError::Inference(_)));
    }

    #[test]
    fn test_api_error_status() {
        let response = ApiError::from(EmbedderError::NotLoaded).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_body_field_names() {
        let req: EmbeddingRequest = serde_json::from_str(r#"{"Texts": ["a", "b"]}"#).unwrap();
        assert_eq!(req.texts, vec!["a", "b"]);

        let json = serde_json::to_value(EmbeddingResponse {
            embeddings: vec![vec![0.5]],
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"Embeddings": [[0.5]]}));
    }
}
