/// Model preloading: resolve local files, download what is missing, build
/// the embedder for the requested format and install it into the cache.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, error, info};

use crate::cache::ModelCache;
use crate::config::Config;
use crate::embedder::download::ModelDownloader;
use crate::embedder::gguf::GgufEmbedder;
use crate::embedder::onnx::OnnxEmbedder;
use crate::embedder::{Embedder, EmbedderError, ModelFormat};

const DEFAULT_ONNX_FILENAME: &str = "model.onnx";
const DEFAULT_VOCAB_FILENAME: &str = "vocab.txt";

/// Body of `POST /preload`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModelDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Repository id, e.g. `onnx-models/all-MiniLM-L6-v2-onnx`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    /// `gguf` or `onnx`, case-insensitive.
    #[serde(default)]
    pub model_format: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary_path: Option<String>,
}

impl ModelDescriptor {
    fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }
}

/// Loads models into a [`ModelCache`], one preload at a time.
pub struct Preloader<D> {
    cache: Arc<ModelCache>,
    downloader: D,
    config: Arc<Config>,
    load_lock: TokioMutex<()>,
}

impl<D: ModelDownloader> Preloader<D> {
    pub fn new(cache: Arc<ModelCache>, downloader: D, config: Arc<Config>) -> Self {
        Self {
            cache,
            downloader,
            config,
            load_lock: TokioMutex::new(()),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Download (if needed), load and install the described model.
    ///
    /// On any failure the cache keeps whatever it held before.
    pub async fn preload(&self, descriptor: &ModelDescriptor) -> Result<ModelFormat, EmbedderError> {
        let format: ModelFormat = descriptor.model_format.parse()?;

        let _guard = self.load_lock.lock().await;
        info!(
            "Preloading {format} model {}",
            descriptor.model_id.as_deref().unwrap_or("<local>")
        );

        let embedder = match format {
            ModelFormat::Gguf => self.load_gguf(descriptor).await,
            ModelFormat::Onnx => self.load_onnx(descriptor).await,
        }
        .inspect_err(|e| error!("Preload failed: {e}"))?;

        self.cache.install(embedder);
        info!("{format} model loaded successfully");
        Ok(format)
    }

    async fn load_gguf(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn Embedder>, EmbedderError> {
        let model_path = self.gguf_model_path(descriptor).await?;
        let options = self.config.gguf.clone();

        let embedder = load_blocking(move || GgufEmbedder::load(&model_path, &options)).await?;
        Ok(Arc::new(embedder))
    }

    async fn load_onnx(&self, descriptor: &ModelDescriptor) -> Result<Arc<dyn Embedder>, EmbedderError> {
        let source = non_empty(&descriptor.source_filename).unwrap_or(DEFAULT_ONNX_FILENAME);
        let output = non_empty(&descriptor.output_filename).unwrap_or(DEFAULT_ONNX_FILENAME);
        let vocab = non_empty(&descriptor.vocabulary_path).unwrap_or(DEFAULT_VOCAB_FILENAME);

        let model_path = self.config.resolve_path(output)?;
        let vocab_path = self.config.resolve_path(vocab)?;

        self.ensure_local(descriptor, source, &model_path).await?;
        self.ensure_local(descriptor, file_name(vocab), &vocab_path).await?;

        let options = self.config.onnx.clone();
        let embedder =
            load_blocking(move || OnnxEmbedder::new(&model_path, &vocab_path, &options)).await?;
        Ok(Arc::new(embedder))
    }

    /// Local path of the GGUF weights, downloading them if absent.
    ///
    /// Without a `SourceFilename`, the first `.gguf` file listed in the
    /// repository is used.
    async fn gguf_model_path(&self, descriptor: &ModelDescriptor) -> Result<PathBuf, EmbedderError> {
        let output = non_empty(&descriptor.output_filename);
        if let Some(output) = output {
            let path = self.config.resolve_path(output)?;
            if path.exists() {
                debug!("Using existing {}", path.display());
                return Ok(path);
            }
        }

        let source = match non_empty(&descriptor.source_filename) {
            Some(source) => source.to_string(),
            None => self.first_gguf_file(descriptor).await?,
        };

        let path = self
            .config
            .resolve_path(output.unwrap_or_else(|| file_name(&source)))?;
        self.ensure_local(descriptor, &source, &path).await?;
        Ok(path)
    }

    async fn first_gguf_file(&self, descriptor: &ModelDescriptor) -> Result<String, EmbedderError> {
        let model_id = require_model_id(descriptor, "list .gguf files")?;
        let files = self
            .downloader
            .list_gguf_files(model_id, descriptor.api_key())
            .await?;

        let first = files.into_iter().next().ok_or_else(|| {
            EmbedderError::Download(format!("no .gguf files found in {model_id}"))
        })?;
        info!(
            "Selected {} ({} bytes) from {model_id}",
            first.filename, first.content_length
        );
        Ok(first.filename)
    }

    /// Download `remote_filename` to `local_path` unless it already exists.
    async fn ensure_local(
        &self,
        descriptor: &ModelDescriptor,
        remote_filename: &str,
        local_path: &Path,
    ) -> Result<(), EmbedderError> {
        if local_path.exists() {
            debug!("Using existing {}", local_path.display());
            return Ok(());
        }

        let model_id = require_model_id(descriptor, &format!("download {remote_filename}"))?;
        self.downloader
            .download_file(model_id, remote_filename, local_path, descriptor.api_key())
            .await
    }
}

/// Run a model constructor off the async runtime.
///
/// A panic inside the native loader surfaces as `ModelLoad`.
async fn load_blocking<T, F>(load: F) -> Result<T, EmbedderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EmbedderError> + Send + 'static,
{
    tokio::task::spawn_blocking(load)
        .await
        .map_err(|e| EmbedderError::ModelLoad(format!("load task failed: {e}")))?
}

fn require_model_id<'a>(descriptor: &'a ModelDescriptor, action: &str) -> Result<&'a str, EmbedderError> {
    non_empty(&descriptor.model_id)
        .ok_or_else(|| EmbedderError::Download(format!("ModelId is required to {action}")))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Last path component of a repository path (`onnx/model.onnx` → `model.onnx`).
fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}
