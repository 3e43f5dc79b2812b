/// Embedder trait and shared types for text embedding.
///
/// Two backends implement [`Embedder`]: [`onnx::OnnxEmbedder`] (tensor graph
/// fed by the WordPiece tokenizer) and [`gguf::GgufEmbedder`] (native
/// llama.cpp weights that tokenize internally).
pub mod download;
pub mod gguf;
pub mod mock;
pub mod onnx;
pub mod tokenizer;
pub mod vocab;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors that can occur while loading models or computing embeddings.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model is not loaded; call /preload first")]
    NotLoaded,
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`. Implementations serialize access to their inference
/// resource internally.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;
}

/// Model file format accepted by `/preload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// GGUF weights served by the native llama.cpp engine.
    Gguf,
    /// ONNX graph executed by ONNX Runtime.
    Onnx,
}

impl ModelFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gguf => "gguf",
            Self::Onnx => "onnx",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFormat {
    type Err = EmbedderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("gguf") {
            Ok(Self::Gguf)
        } else if s.eq_ignore_ascii_case("onnx") {
            Ok(Self::Onnx)
        } else {
            Err(EmbedderError::UnsupportedFormat(format!(
                "{s:?} (supported formats: gguf, onnx)"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse_case_insensitive() {
        assert_eq!("gguf".parse::<ModelFormat>().unwrap(), ModelFormat::Gguf);
        assert_eq!("GGUF".parse::<ModelFormat>().unwrap(), ModelFormat::Gguf);
        assert_eq!("Onnx".parse::<ModelFormat>().unwrap(), ModelFormat::Onnx);
    }

    #[test]
    fn test_format_parse_unknown() {
        let err = "xyz".parse::<ModelFormat>().unwrap_err();
        assert!(matches!(err, EmbedderError::UnsupportedFormat(_)));
        assert!(err.to_string().contains("xyz"));
    }

    #[test]
    fn test_format_display() {
        assert_eq!(ModelFormat::Gguf.to_string(), "gguf");
        assert_eq!(ModelFormat::Onnx.to_string(), "onnx");
    }
}
