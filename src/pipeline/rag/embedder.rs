use sha2::{Digest, Sha256};

use super::keyword::tokenize;
use super::types::EmbeddingModel;
use super::RagError;

/// Dimension of all-MiniLM-L6-v2, reused by the hashing embedder.
pub const EMBEDDING_DIM: usize = 384;

/// Model identifier that selects [`HashingEmbedder`].
pub const HASHING_EMBEDDER: &str = "hashing";

/// Scale to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vec.iter_mut() {
            *val /= norm;
        }
    }
}

/// Cosine similarity; 0.0 for mismatched, empty or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

// ═══════════════════════════════════════════════════════════
// Feature-hashing embedder (offline, deterministic)
// ═══════════════════════════════════════════════════════════

/// Bag-of-words embedder using signed feature hashing.
///
/// Each token is hashed with SHA-256 into one of `dimension` buckets with a
/// ±1 sign; the result is L2-normalized. Texts sharing vocabulary land close
/// together, which is enough for lexical-semantic ranking without a model
/// download.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(EMBEDDING_DIM)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }
        l2_normalize(&mut vec);
        vec
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingModel for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        Ok(self.vectorize(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ═══════════════════════════════════════════════════════════
// ONNX sentence embedder, behind the `onnx-embeddings` feature
// ═══════════════════════════════════════════════════════════

#[cfg(feature = "onnx-embeddings")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::Session;
    use ort::value::TensorRef;

    use super::{l2_normalize, EmbeddingModel, RagError, EMBEDDING_DIM};

    /// Sentence-transformer embedder running on ONNX Runtime.
    ///
    /// The model directory must hold `model.onnx` and `tokenizer.json`.
    /// `Session::run` needs `&mut`, hence the mutex.
    pub struct OnnxEmbedder {
        session: Mutex<Session>,
        tokenizer: tokenizers::Tokenizer,
    }

    fn model_err(e: impl std::fmt::Display) -> RagError {
        RagError::EmbeddingFailed(e.to_string())
    }

    impl OnnxEmbedder {
        pub fn load(model_dir: &Path) -> Result<Self, RagError> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");
            for path in [&model_path, &tokenizer_path] {
                if !path.exists() {
                    return Err(RagError::ModelNotFound(path.clone()));
                }
            }

            let load_err = |e: ort::Error| RagError::ModelLoad {
                model: model_dir.display().to_string(),
                reason: e.to_string(),
            };
            let session = Session::builder()
                .map_err(load_err)?
                .with_intra_threads(2)
                .map_err(load_err)?
                .commit_from_file(&model_path)
                .map_err(load_err)?;

            let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| RagError::Tokenization(e.to_string()))?;

            tracing::info!(dir = %model_dir.display(), "ONNX embedder loaded");
            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
            })
        }

        fn infer(&self, text: &str) -> Result<Vec<f32>, RagError> {
            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| RagError::Tokenization(e.to_string()))?;

            let to_i64 = |xs: &[u32]| xs.iter().map(|&x| x as i64).collect::<Vec<i64>>();
            let ids = to_i64(encoding.get_ids());
            let mask = to_i64(encoding.get_attention_mask());
            let types = to_i64(encoding.get_type_ids());
            let seq_len = ids.len();

            let as_array = |v: Vec<i64>| {
                ndarray::Array2::from_shape_vec((1, seq_len), v).map_err(model_err)
            };
            let ids_array = as_array(ids)?;
            let mask_array = as_array(mask.clone())?;
            let types_array = as_array(types)?;

            let mut session = self
                .session
                .lock()
                .map_err(|_| RagError::EmbeddingFailed("session lock poisoned".into()))?;
            let outputs = session
                .run(ort::inputs![
                    TensorRef::from_array_view(&ids_array).map_err(model_err)?,
                    TensorRef::from_array_view(&mask_array).map_err(model_err)?,
                    TensorRef::from_array_view(&types_array).map_err(model_err)?
                ])
                .map_err(model_err)?;

            let (shape, hidden) = outputs[0].try_extract_tensor::<f32>().map_err(model_err)?;
            if shape.len() != 3 || shape[2] as usize != EMBEDDING_DIM {
                return Err(RagError::EmbeddingFailed(format!(
                    "unexpected output shape {shape:?}"
                )));
            }

            Ok(mean_pool(hidden, &mask))
        }
    }

    /// Attention-masked mean over token states, L2-normalized.
    fn mean_pool(hidden: &[f32], mask: &[i64]) -> Vec<f32> {
        let mut pooled = vec![0.0f32; EMBEDDING_DIM];
        let mut weight = 0.0f32;
        for (token, &m) in mask.iter().enumerate() {
            let m = m as f32;
            weight += m;
            let row = &hidden[token * EMBEDDING_DIM..(token + 1) * EMBEDDING_DIM];
            for (p, h) in pooled.iter_mut().zip(row) {
                *p += h * m;
            }
        }
        if weight > 0.0 {
            pooled.iter_mut().for_each(|p| *p /= weight);
        }
        l2_normalize(&mut pooled);
        pooled
    }

    impl EmbeddingModel for OnnxEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
            self.infer(text)
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
            texts.iter().map(|t| self.infer(t)).collect()
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIM
        }
    }
}

#[cfg(feature = "onnx-embeddings")]
pub use onnx::OnnxEmbedder;
