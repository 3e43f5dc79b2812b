/// GGUF embedder backed by a native embedding engine.
///
/// The engine tokenizes and runs inference itself; [`GgufEmbedder`] only
/// serializes calls into it and maps its failures onto [`EmbedderError`].
use std::path::Path;
use std::sync::Mutex;

use super::{Embedder, EmbedderError};
use crate::config::GgufConfig;

/// A loaded native model able to embed raw text.
///
/// Calls take `&mut self`: native contexts are not reentrant.
pub trait NativeEmbeddingContext: Send {
    fn embed(&mut self, text: &str) -> Result<Vec<f32>, EmbedderError>;
}

/// Native-weights embedder implementing the `Embedder` trait.
pub struct GgufEmbedder {
    context: Mutex<Box<dyn NativeEmbeddingContext>>,
}

impl GgufEmbedder {
    /// Wrap an already loaded native context.
    pub fn new(context: Box<dyn NativeEmbeddingContext>) -> Self {
        Self {
            context: Mutex::new(context),
        }
    }

    /// Load a GGUF weights file with llama.cpp.
    #[cfg(feature = "gguf")]
    pub fn load(model_path: &Path, options: &GgufConfig) -> Result<Self, EmbedderError> {
        let context = llama::LlamaEmbeddingContext::load(model_path, options)?;
        Ok(Self::new(Box::new(context)))
    }

    /// Load a GGUF weights file with llama.cpp.
    #[cfg(not(feature = "gguf"))]
    pub fn load(model_path: &Path, _options: &GgufConfig) -> Result<Self, EmbedderError> {
        Err(EmbedderError::ModelLoad(format!(
            "cannot load {}: built without gguf support (enable the `gguf` feature)",
            model_path.display()
        )))
    }
}

impl Embedder for GgufEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut context = self
            .context
            .lock()
            .map_err(|e| EmbedderError::Inference(format!("lock poisoned: {e}")))?;
        context.embed(text)
    }
}

/// Remove characters that break C string handling in llama.cpp.
///
/// NUL terminates C strings; other C0 controls except tab, newline and
/// carriage return are dropped too.
#[cfg_attr(not(feature = "gguf"), allow(dead_code))]
fn sanitize_for_tokenizer(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\0' && (*c >= ' ' || matches!(*c, '\t' | '\n' | '\r')))
        .collect()
}

#[cfg(feature = "gguf")]
mod llama {
    use std::num::NonZeroU32;
    use std::path::Path;
    use std::sync::OnceLock;

    use llama_cpp_2::context::params::LlamaContextParams;
    use llama_cpp_2::llama_backend::LlamaBackend;
    use llama_cpp_2::llama_batch::LlamaBatch;
    use llama_cpp_2::model::params::LlamaModelParams;
    use llama_cpp_2::model::{AddBos, LlamaModel};
    use tracing::{info, warn};

    use super::{NativeEmbeddingContext, sanitize_for_tokenizer};
    use crate::config::GgufConfig;
    use crate::embedder::EmbedderError;

    /// llama.cpp may only be initialised once per process.
    fn backend() -> Result<&'static LlamaBackend, EmbedderError> {
        static BACKEND: OnceLock<LlamaBackend> = OnceLock::new();

        if let Some(backend) = BACKEND.get() {
            return Ok(backend);
        }
        let backend = LlamaBackend::init()
            .map_err(|e| EmbedderError::ModelLoad(format!("backend init failed: {e:?}")))?;
        Ok(BACKEND.get_or_init(|| backend))
    }

    pub(super) struct LlamaEmbeddingContext {
        backend: &'static LlamaBackend,
        model: LlamaModel,
        context_size: u32,
    }

    impl LlamaEmbeddingContext {
        pub(super) fn load(model_path: &Path, options: &GgufConfig) -> Result<Self, EmbedderError> {
            let backend = backend()?;

            let model_params = LlamaModelParams::default().with_n_gpu_layers(options.gpu_layers);
            let model = LlamaModel::load_from_file(backend, model_path, &model_params)
                .map_err(|e| EmbedderError::ModelLoad(format!("failed to load model: {e:?}")))?;

            info!(
                "GGUF model loaded from {} (embedding size: {})",
                model_path.display(),
                model.n_embd()
            );

            Ok(Self {
                backend,
                model,
                context_size: options.context_size,
            })
        }
    }

    impl NativeEmbeddingContext for LlamaEmbeddingContext {
        fn embed(&mut self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            let sanitized = sanitize_for_tokenizer(text);
            if sanitized.len() != text.len() {
                warn!(
                    "Removed {} control bytes before tokenizing",
                    text.len() - sanitized.len()
                );
            }

            let tokens = self
                .model
                .str_to_token(&sanitized, AddBos::Always)
                .map_err(|e| EmbedderError::Inference(format!("failed to tokenize: {e:?}")))?;

            if tokens.len() > self.context_size as usize {
                return Err(EmbedderError::Inference(format!(
                    "input is {} tokens, context window is {}",
                    tokens.len(),
                    self.context_size
                )));
            }

            // A fresh context per call keeps no KV state between texts.
            let ctx_params = LlamaContextParams::default()
                .with_n_ctx(NonZeroU32::new(self.context_size))
                .with_n_batch(self.context_size)
                .with_embeddings(true);

            let mut ctx = self
                .model
                .new_context(self.backend, ctx_params)
                .map_err(|e| EmbedderError::Inference(format!("failed to create context: {e:?}")))?;

            let mut batch = LlamaBatch::new(tokens.len().max(1), 1);
            batch
                .add_sequence(&tokens, 0, false)
                .map_err(|e| EmbedderError::Inference(format!("failed to fill batch: {e:?}")))?;

            ctx.decode(&mut batch)
                .map_err(|e| EmbedderError::Inference(format!("decode failed: {e:?}")))?;

            // Pooled models expose a sequence embedding; otherwise take the
            // last token's.
            let embedding = match ctx.embeddings_seq_ith(0) {
                Ok(values) => values.to_vec(),
                Err(_) => ctx
                    .embeddings_ith(tokens.len() as i32 - 1)
                    .map_err(|e| {
                        EmbedderError::Inference(format!("no embeddings in output: {e:?}"))
                    })?
                    .to_vec(),
            };

            Ok(embedding)
        }
    }
}
