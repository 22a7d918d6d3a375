use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::types::{EmbeddingModel, ModelProvider, Reranker};
use super::RagError;

/// Load-once cache of embedding and reranking models.
///
/// Shared across jobs behind an `Arc`. Entries live until [`ModelCache::clear`]
/// is called; there is no automatic eviction. The lock is held while a model
/// loads, so concurrent first requests for one key load it exactly once.
pub struct ModelCache {
    provider: Arc<dyn ModelProvider>,
    embedders: Mutex<HashMap<String, Arc<dyn EmbeddingModel>>>,
    rerankers: Mutex<HashMap<String, Arc<dyn Reranker>>>,
}

impl ModelCache {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            embedders: Mutex::new(HashMap::new()),
            rerankers: Mutex::new(HashMap::new()),
        }
    }

    pub fn embedder(&self, model: &str) -> Result<Arc<dyn EmbeddingModel>, RagError> {
        let mut embedders = self.embedders.lock().map_err(|_| RagError::CachePoisoned)?;
        if let Some(existing) = embedders.get(model) {
            return Ok(Arc::clone(existing));
        }

        let loaded = self.provider.load_embedder(model)?;
        tracing::info!(model = %model, "Embedding model loaded");
        embedders.insert(model.to_string(), Arc::clone(&loaded));
        Ok(loaded)
    }

    pub fn reranker(&self, model: &str, top_n: usize) -> Result<Arc<dyn Reranker>, RagError> {
        let key = reranker_key(model, top_n);
        let mut rerankers = self.rerankers.lock().map_err(|_| RagError::CachePoisoned)?;
        if let Some(existing) = rerankers.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let loaded = self.provider.load_reranker(model, top_n)?;
        tracing::info!(model = %model, top_n, "Reranker loaded");
        rerankers.insert(key, Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Drop every cached model.
    pub fn clear(&self) {
        if let Ok(mut embedders) = self.embedders.lock() {
            embedders.clear();
        }
        if let Ok(mut rerankers) = self.rerankers.lock() {
            rerankers.clear();
        }
        tracing::debug!("Model cache cleared");
    }

    /// `(embedders, rerankers)` currently cached.
    pub fn len(&self) -> (usize, usize) {
        let embedders = self.embedders.lock().map(|m| m.len()).unwrap_or(0);
        let rerankers = self.rerankers.lock().map(|m| m.len()).unwrap_or(0);
        (embedders, rerankers)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }
}

/// Cache key for a reranker: the same model at two `top_n` values is two entries.
pub fn reranker_key(model: &str, top_n: usize) -> String {
    format!("{model}_{top_n}")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::pipeline::rag::{HashingEmbedder, LexicalReranker};

    #[derive(Default)]
    struct CountingProvider {
        embedder_loads: AtomicUsize,
        reranker_loads: AtomicUsize,
    }

    impl ModelProvider for CountingProvider {
        fn load_embedder(&self, _model: &str) -> Result<Arc<dyn EmbeddingModel>, RagError> {
            self.embedder_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(HashingEmbedder::with_dimension(8)))
        }

        fn load_reranker(&self, _model: &str, top_n: usize) -> Result<Arc<dyn Reranker>, RagError> {
            self.reranker_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(LexicalReranker::new(top_n)))
        }
    }

    #[test]
    fn embedder_loads_once_per_model() {
        let provider = Arc::new(CountingProvider::default());
        let cache = ModelCache::new(provider.clone());
        cache.embedder("a").unwrap();
        cache.embedder("a").unwrap();
        cache.embedder("b").unwrap();
        assert_eq!(provider.embedder_loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), (2, 0));
    }

    #[test]
    fn rerankers_keyed_by_model_and_top_n() {
        let provider = Arc::new(CountingProvider::default());
        let cache = ModelCache::new(provider.clone());
        cache.reranker("lexical", 2).unwrap();
        cache.reranker("lexical", 2).unwrap();
        cache.reranker("lexical", 5).unwrap();
        assert_eq!(provider.reranker_loads.load(Ordering::SeqCst), 2);
        assert_eq!(reranker_key("lexical", 5), "lexical_5");
    }

    #[test]
    fn clear_forces_reload() {
        let provider = Arc::new(CountingProvider::default());
        let cache = ModelCache::new(provider.clone());
        cache.embedder("a").unwrap();
        cache.clear();
        assert!(cache.is_empty());
        cache.embedder("a").unwrap();
        assert_eq!(provider.embedder_loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn load_failures_are_not_cached() {
        struct FailingProvider;
        impl ModelProvider for FailingProvider {
            fn load_embedder(&self, model: &str) -> Result<Arc<dyn EmbeddingModel>, RagError> {
                Err(RagError::ModelLoad {
                    model: model.into(),
                    reason: "offline".into(),
                })
            }
            fn load_reranker(&self, model: &str, _: usize) -> Result<Arc<dyn Reranker>, RagError> {
                Err(RagError::ModelLoad {
                    model: model.into(),
                    reason: "offline".into(),
                })
            }
        }

        let cache = ModelCache::new(Arc::new(FailingProvider));
        assert!(cache.embedder("a").is_err());
        assert!(cache.is_empty());
    }
}
