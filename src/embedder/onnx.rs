/// ONNX Runtime embedder using the `ort` crate.
///
/// Loads a MiniLM-style ONNX graph plus a WordPiece `vocab.txt`, feeds it
/// `input_ids`, `attention_mask` and `token_type_ids`, and returns the first
/// output flattened. Pooling, if any, is up to the graph.
use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use super::tokenizer::WordPieceTokenizer;
use super::vocab::Vocabulary;
use super::{Embedder, EmbedderError};
use crate::config::OnnxConfig;

/// ONNX-backed embedder implementing the `Embedder` trait.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: WordPieceTokenizer,
    pad_to_max_length: bool,
}

impl OnnxEmbedder {
    /// Create a new `OnnxEmbedder` from a model file and a vocabulary file.
    ///
    /// The vocabulary is checked first so a bad `vocab.txt` fails before the
    /// (much slower) session load.
    pub fn new(
        model_path: &Path,
        vocab_path: &Path,
        options: &OnnxConfig,
    ) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelLoad(format!(
                "{} not found",
                model_path.display()
            )));
        }

        let vocab = Vocabulary::from_file(vocab_path)?;
        let tokenizer = WordPieceTokenizer::new(vocab)?;
        info!("Vocabulary loaded (size: {})", tokenizer.vocab_size());

        info!("Initializing ONNX Runtime...");

        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoad(format!("session builder error: {e}")))?
            .with_intra_threads(options.intra_threads)
            .map_err(|e| EmbedderError::ModelLoad(format!("thread config error: {e}")))?
            .with_inter_threads(options.inter_threads)
            .map_err(|e| EmbedderError::ModelLoad(format!("thread config error: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| EmbedderError::ModelLoad(format!("model load error: {e}")))?;

        info!("ONNX model loaded from {}", model_path.display());

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            pad_to_max_length: options.pad_to_max_length,
        })
    }
}

/// The three `[1, n]` i64 inputs a BERT-style graph expects.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelInputs {
    shape: [usize; 2],
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    token_type_ids: Vec<i64>,
}

/// Tokenize `text` into a batch of one. Single-segment input, so every
/// token type id is 0.
fn model_inputs(
    tokenizer: &WordPieceTokenizer,
    text: &str,
    pad_to_max_length: bool,
) -> ModelInputs {
    let mut tokens = tokenizer.tokenize(text);
    if pad_to_max_length {
        tokens.pad_to(tokenizer.max_length());
    }

    let seq_len = tokens.len();
    ModelInputs {
        shape: [1, seq_len],
        input_ids: tokens.input_ids,
        attention_mask: tokens.attention_mask,
        token_type_ids: vec![0; seq_len],
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let inputs = model_inputs(&self.tokenizer, text, self.pad_to_max_length);

        // Create input tensors using (shape, data) tuple form
        // This avoids ndarray version coupling with ort
        let input_ids_val = Tensor::from_array((inputs.shape, inputs.input_ids))
            .map_err(|e| EmbedderError::Inference(format!("input_ids error: {e}")))?;
        let attention_mask_val = Tensor::from_array((inputs.shape, inputs.attention_mask))
            .map_err(|e| EmbedderError::Inference(format!("attention_mask error: {e}")))?;
        let token_type_ids_val = Tensor::from_array((inputs.shape, inputs.token_type_ids))
            .map_err(|e| EmbedderError::Inference(format!("token_type_ids error: {e}")))?;

        // Run inference with named inputs
        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::Inference(format!("lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_val,
                "attention_mask" => attention_mask_val,
                "token_type_ids" => token_type_ids_val,
            ])
            .map_err(|e| EmbedderError::Inference(format!("session run failed: {e}")))?;

        // try_extract_tensor returns Result<(&Shape, &[T])>; the data is
        // already laid out row-major, so flattening is a copy.
        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::Inference(format!("output extraction: {e}")))?;

        Ok(data.to_vec())
    }
}
