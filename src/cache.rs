/// Single-slot cache holding the active embedder.
///
/// Callers take an `Arc` snapshot with [`ModelCache::current`], so an
/// in-flight request finishes on the embedder it started with even if a
/// preload swaps the slot meanwhile. A replaced embedder is released when
/// its last snapshot is dropped.
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::embedder::{Embedder, EmbedderError};

#[derive(Default)]
pub struct ModelCache {
    slot: RwLock<Option<Arc<dyn Embedder>>>,
}

impl ModelCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `embedder` the active model, replacing any previous one.
    pub fn install(&self, embedder: Arc<dyn Embedder>) {
        let previous = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(embedder);

        if previous.is_some() {
            info!("Replaced previously loaded model");
        }
        // `previous` drops here, outside the lock.
    }

    /// Drop the active model, if any.
    pub fn clear(&self) {
        let previous = self
            .slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if previous.is_some() {
            info!("Model cache cleared");
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The active embedder, or `NotLoaded` when the cache is empty.
    pub fn current(&self) -> Result<Arc<dyn Embedder>, EmbedderError> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EmbedderError::NotLoaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;

    #[test]
    fn test_starts_empty() {
        let cache = ModelCache::new();
        assert!(!cache.is_loaded());
        assert!(matches!(cache.current(), Err(EmbedderError::NotLoaded)));
    }

    #[test]
    fn test_install_and_clear() {
        let cache = ModelCache::new();
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(8));

        cache.install(embedder.clone());
        assert!(cache.is_loaded());
        assert!(Arc::ptr_eq(&cache.current().unwrap(), &embedder));

        cache.clear();
        assert!(!cache.is_loaded());
        assert!(matches!(cache.current(), Err(EmbedderError::NotLoaded)));

        // Clearing an empty cache is a no-op.
        cache.clear();
        assert!(!cache.is_loaded());
    }

    #[test]
    fn test_install_replaces() {
        let cache = ModelCache::new();
        let first: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(4));
        let second: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(16));

        cache.install(first.clone());
        cache.install(second.clone());

        let current = cache.current().unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert_eq!(current.embed("x").unwrap().len(), 16);
        // The cache no longer holds the first embedder.
        assert_eq!(Arc::strong_count(&first), 1);
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let cache = ModelCache::new();
        cache.install(Arc::new(MockEmbedder::new(4)));

        let in_flight = cache.current().unwrap();
        cache.install(Arc::new(MockEmbedder::new(16)));

        assert_eq!(in_flight.embed("x").unwrap().len(), 4);
        assert_eq!(cache.current().unwrap().embed("x").unwrap().len(), 16);
    }
}
