use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::embedder::{HashingEmbedder, HASHING_EMBEDDER};
use super::rerank::{LexicalReranker, LEXICAL_RERANKER};
use super::types::{EmbeddingModel, ModelProvider, Reranker};
use super::RagError;

/// Resolves model identifiers to built-in or on-disk models.
///
/// `hashing` and `lexical` are always available. Any other embedding model
/// is looked up as an ONNX export under `models_dir/<name>/`, which requires
/// the `onnx-embeddings` feature. Rerankers other than `lexical` are not
/// bundled.
pub struct LocalModelProvider {
    models_dir: PathBuf,
}

impl LocalModelProvider {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Directory for a model id; `/` in hub-style ids becomes `--`.
    pub fn model_path(&self, model: &str) -> PathBuf {
        self.models_dir.join(model.replace('/', "--"))
    }
}

impl Default for LocalModelProvider {
    fn default() -> Self {
        Self::new(crate::config::models_dir())
    }
}

impl ModelProvider for LocalModelProvider {
    fn load_embedder(&self, model: &str) -> Result<Arc<dyn EmbeddingModel>, RagError> {
        if model == HASHING_EMBEDDER {
            return Ok(Arc::new(HashingEmbedder::new()));
        }

        load_onnx_embedder(model, &self.model_path(model))
    }

    fn load_reranker(&self, model: &str, top_n: usize) -> Result<Arc<dyn Reranker>, RagError> {
        if model == LEXICAL_RERANKER {
            return Ok(Arc::new(LexicalReranker::new(top_n)));
        }
        Err(RagError::ModelLoad {
            model: model.to_string(),
            reason: format!("no reranker available under {}", self.model_path(model).display()),
        })
    }
}

#[cfg(feature = "onnx-embeddings")]
fn load_onnx_embedder(_model: &str, dir: &Path) -> Result<Arc<dyn EmbeddingModel>, RagError> {
    let embedder = super::embedder::OnnxEmbedder::load(dir)?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "onnx-embeddings"))]
fn load_onnx_embedder(model: &str, _dir: &Path) -> Result<Arc<dyn EmbeddingModel>, RagError> {
    Err(RagError::ModelLoad {
        model: model.to_string(),
        reason: "built without the onnx-embeddings feature".into(),
    })
}
