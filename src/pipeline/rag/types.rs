use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::RagError;
use crate::pipeline::preprocess::DocumentChunk;

pub const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_RERANKER_MODEL: &str = "BAAI/bge-reranker-v2-m3";

/// Relevance assigned to chunks picked by the fallback path.
pub const FALLBACK_SCORE: f32 = 0.5;

/// Relevance of the full-text pseudo-chunk when retrieval is disabled.
pub const FULL_TEXT_SCORE: f32 = 1.0;

/// Character bound on the context sent when retrieval is disabled (~16k tokens).
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 65_000;

fn default_semantic_weight() -> f32 {
    0.6
}

fn default_keyword_weight() -> f32 {
    0.4
}

// ═══════════════════════════════════════════
// Strategy
// ═══════════════════════════════════════════

/// How chunks are ranked against the query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Embedding similarity.
    #[default]
    Semantic,
    /// BM25 term relevance.
    Keyword,
    /// Weighted merge of independent semantic and keyword rankings.
    /// Weights need not sum to 1.
    Ensemble {
        #[serde(default = "default_semantic_weight")]
        semantic_weight: f32,
        #[serde(default = "default_keyword_weight")]
        keyword_weight: f32,
    },
    /// Ensemble with the weights forced to 0.5 / 0.5.
    Hybrid,
    /// Keyword candidates refined semantically; plain semantic when the
    /// keyword stage finds nothing.
    Sequential,
}

impl RetrievalStrategy {
    /// Ensemble with the default 0.6 / 0.4 weighting.
    pub fn ensemble() -> Self {
        Self::Ensemble {
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Ensemble { .. } => "ensemble",
            Self::Hybrid => "hybrid",
            Self::Sequential => "sequential",
        }
    }

    /// Whether this strategy needs an embedding model.
    pub fn uses_embeddings(&self) -> bool {
        !matches!(self, Self::Keyword)
    }
}

impl std::fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════

/// Optional reranking pass applied on top of the base ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub model: String,
    /// Chunks kept after reranking.
    pub top_n: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_RERANKER_MODEL.to_string(),
            top_n: 2,
        }
    }
}

/// Retrieval settings for one extraction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// When false, the full document (truncated to `max_context_chars`) is the context.
    pub enabled: bool,
    pub strategy: RetrievalStrategy,
    /// Chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive sub-split chunks.
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embedding_model: String,
    pub reranker: Option<RerankConfig>,
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: RetrievalStrategy::default(),
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 3,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            reranker: None,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

impl RetrievalConfig {
    /// Reject combinations that cannot produce a ranking.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::InvalidConfig("top_k must be positive".into()));
        }
        if self.max_context_chars == 0 {
            return Err(RagError::InvalidConfig("max_context_chars must be positive".into()));
        }
        if let RetrievalStrategy::Ensemble {
            semantic_weight,
            keyword_weight,
        } = self.strategy
        {
            let valid = |w: f32| w.is_finite() && w >= 0.0;
            if !valid(semantic_weight) || !valid(keyword_weight) {
                return Err(RagError::InvalidConfig(
                    "ensemble weights must be finite and non-negative".into(),
                ));
            }
            if semantic_weight + keyword_weight <= 0.0 {
                return Err(RagError::InvalidConfig(
                    "ensemble weights must not both be zero".into(),
                ));
            }
        }
        if let Some(reranker) = &self.reranker {
            if reranker.top_n == 0 {
                return Err(RagError::InvalidConfig("reranker top_n must be positive".into()));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════
// Model capabilities
// ═══════════════════════════════════════════

/// Embedding model abstraction
pub trait EmbeddingModel: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError>;
    fn dimension(&self) -> usize;
}

impl<T: EmbeddingModel + ?Sized> EmbeddingModel for Box<T> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        (**self).embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }
}

/// Scores (query, document) pairs jointly, cross-encoder style.
pub trait Reranker: Send + Sync {
    /// `(document index, score)` pairs, best first, at most `top_n()` of them.
    fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<(usize, f32)>, RagError>;
    fn top_n(&self) -> usize;
}

/// Loads embedding and reranking models by identifier.
pub trait ModelProvider: Send + Sync {
    fn load_embedder(&self, model: &str) -> Result<Arc<dyn EmbeddingModel>, RagError>;
    fn load_reranker(&self, model: &str, top_n: usize) -> Result<Arc<dyn Reranker>, RagError>;
}

// ═══════════════════════════════════════════
// Output
// ═══════════════════════════════════════════

/// Ranked chunks plus the rendered context string handed to the prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedContext {
    pub text: String,
    pub chunks: Vec<DocumentChunk>,
    /// True when the fallback selection was used.
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RetrievalConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.strategy, RetrievalStrategy::Semantic);
        assert_eq!(config.max_context_chars, 65_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn strategy_serializes_as_tagged_enum() {
        let json = serde_json::to_value(RetrievalStrategy::ensemble()).unwrap();
        assert_eq!(json["type"], "ensemble");
        assert!((json["semantic_weight"].as_f64().unwrap() - 0.6).abs() < 1e-6);

        let parsed: RetrievalStrategy = serde_json::from_str(r#"{"type":"hybrid"}"#).unwrap();
        assert_eq!(parsed, RetrievalStrategy::Hybrid);
    }

    #[test]
    fn ensemble_weights_default_when_omitted() {
        let parsed: RetrievalStrategy = serde_json::from_str(r#"{"type":"ensemble"}"#).unwrap();
        assert_eq!(parsed, RetrievalStrategy::ensemble());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        let config = RetrievalConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RagError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_zero_ensemble_weights() {
        let config = RetrievalConfig {
            strategy: RetrievalStrategy::Ensemble {
                semantic_weight: 0.0,
                keyword_weight: 0.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn weights_need_not_sum_to_one() {
        let config = RetrievalConfig {
            strategy: RetrievalStrategy::Ensemble {
                semantic_weight: 3.0,
                keyword_weight: 1.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_negative_weight() {
        let config = RetrievalConfig {
            strategy: RetrievalStrategy::Ensemble {
                semantic_weight: -1.0,
                keyword_weight: 1.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn keyword_strategy_needs_no_embeddings() {
        assert!(!RetrievalStrategy::Keyword.uses_embeddings());
        assert!(RetrievalStrategy::Hybrid.uses_embeddings());
    }
}
