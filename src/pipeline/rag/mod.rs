//! Context retrieval: ranks document chunks against a query.
//!
//! Strategies are a tagged enum dispatched through
//! [`ContextRetriever::retrieve`]. Every failure inside this module
//! degrades to a fallback chunk selection; nothing here aborts extraction.

pub mod types;
pub mod keyword;
pub mod embedder;
pub mod rerank;
pub mod provider;
pub mod cache;
pub mod retrieval;

pub use types::*;
pub use keyword::*;
pub use embedder::*;
pub use rerank::*;
pub use provider::*;
pub use cache::*;
pub use retrieval::*;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Reranking failed: {0}")]
    RerankFailed(String),

    #[error("Model {model} could not be loaded: {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("No chunks to retrieve from")]
    EmptyChunkSet,

    #[error("Model cache lock poisoned")]
    CachePoisoned,

    #[error("Invalid retrieval configuration: {0}")]
    InvalidConfig(String),
}
