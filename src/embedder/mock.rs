/// Model-free embedder for tests and for running the HTTP surface without
/// downloading anything.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError};

/// Hashes `(text, component)` pairs into a unit vector.
///
/// Equal texts always map to equal vectors; the values carry no meaning.
#[derive(Debug, Clone, Copy)]
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// One component in `[-1, 1]`.
    fn component(text: &str, index: usize) -> f32 {
        let mut hasher = DefaultHasher::new();
        (text, index).hash(&mut hasher);
        let unit = (hasher.finish() >> 40) as f32 / (1u64 << 24) as f32;
        unit.mul_add(2.0, -1.0)
    }
}

impl Default for MockEmbedder {
    /// Same width as all-MiniLM-L6-v2.
    fn default() -> Self {
        Self::new(384)
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|i| Self::component(text, i))
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}
