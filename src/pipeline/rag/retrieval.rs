use std::collections::BTreeMap;
use std::sync::Arc;

use super::cache::ModelCache;
use super::embedder::cosine_similarity;
use super::keyword::{rank_top_k, Bm25Index};
use super::types::{
    RetrievalConfig, RetrievalStrategy, RetrievedContext, FALLBACK_SCORE, FULL_TEXT_SCORE,
};
use super::RagError;
use crate::pipeline::preprocess::{
    ChunkOrigin, Chunker, DocumentChunk, SectionChunker, FULL_TEXT_SECTION,
};

/// Selects the chunks of a document most relevant to a query.
///
/// Never fails: any [`RagError`] raised while ranking is logged and replaced
/// by the fallback selection (first `top_k` chunks, score 0.5).
pub struct ContextRetriever {
    cache: Arc<ModelCache>,
}

impl ContextRetriever {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Ranked chunks, each carrying a relevance score in [0, 1].
    pub fn retrieve(
        &self,
        document: &str,
        query: &str,
        config: &RetrievalConfig,
    ) -> Vec<DocumentChunk> {
        self.retrieve_context(document, query, config).chunks
    }

    /// Ranked chunks plus the context string to place in the prompt.
    ///
    /// With retrieval disabled the context is the document itself, cut to
    /// `max_context_chars`, without chunk headers.
    pub fn retrieve_context(
        &self,
        document: &str,
        query: &str,
        config: &RetrievalConfig,
    ) -> RetrievedContext {
        if !config.enabled {
            let chunk = full_text_chunk(document, config.max_context_chars);
            return RetrievedContext {
                text: chunk.content.clone(),
                chunks: vec![chunk],
                degraded: false,
            };
        }

        let chunks = SectionChunker::new(config.chunk_size, config.chunk_overlap).chunk(document);

        match self.rank(&chunks, query, config) {
            Ok(ranked) => {
                tracing::debug!(
                    strategy = %config.strategy,
                    chunks = chunks.len(),
                    selected = ranked.len(),
                    "Context retrieved"
                );
                RetrievedContext {
                    text: format_context(&ranked),
                    chunks: ranked,
                    degraded: false,
                }
            }
            Err(e) => {
                tracing::warn!(
                    strategy = %config.strategy,
                    error = %e,
                    "Retrieval failed, using leading chunks"
                );
                let fallback = fallback_chunks(&chunks, config.top_k);
                RetrievedContext {
                    text: format_context(&fallback),
                    chunks: fallback,
                    degraded: true,
                }
            }
        }
    }

    fn rank(
        &self,
        chunks: &[DocumentChunk],
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<Vec<DocumentChunk>, RagError> {
        if chunks.is_empty() {
            return Err(RagError::EmptyChunkSet);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let k = config.top_k;

        let ranked = match &config.strategy {
            RetrievalStrategy::Semantic => self.semantic(&texts, query, config, k)?,
            RetrievalStrategy::Keyword => Bm25Index::new(&texts).top_k(query, k),
            RetrievalStrategy::Ensemble {
                semantic_weight,
                keyword_weight,
            } => self.ensemble(&texts, query, config, *semantic_weight, *keyword_weight)?,
            // Configured weights are deliberately ignored here.
            RetrievalStrategy::Hybrid => self.ensemble(&texts, query, config, 0.5, 0.5)?,
            RetrievalStrategy::Sequential => self.sequential(&texts, query, config)?,
        };

        let ranked = match &config.reranker {
            Some(rerank) => {
                let reranker = self.cache.reranker(&rerank.model, rerank.top_n)?;
                let candidates: Vec<&str> = ranked.iter().map(|(i, _)| texts[*i]).collect();
                reranker
                    .rerank(query, &candidates)?
                    .into_iter()
                    .filter_map(|(pos, score)| ranked.get(pos).map(|(i, _)| (*i, score)))
                    .take(rerank.top_n)
                    .collect()
            }
            None => ranked,
        };

        Ok(ranked
            .into_iter()
            .map(|(i, score)| chunks[i].clone().with_score(score.clamp(0.0, 1.0)))
            .collect())
    }

    /// Cosine similarity of every chunk to the query, clamped to [0, 1].
    fn semantic_scores(
        &self,
        texts: &[&str],
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<Vec<f32>, RagError> {
        let embedder = self.cache.embedder(&config.embedding_model)?;
        let query_vec = embedder.embed(query)?;
        let chunk_vecs = embedder.embed_batch(texts)?;
        if chunk_vecs.len() != texts.len() {
            return Err(RagError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                chunk_vecs.len()
            )));
        }
        Ok(chunk_vecs
            .iter()
            .map(|v| cosine_similarity(&query_vec, v).clamp(0.0, 1.0))
            .collect())
    }

    fn semantic(
        &self,
        texts: &[&str],
        query: &str,
        config: &RetrievalConfig,
        k: usize,
    ) -> Result<Vec<(usize, f32)>, RagError> {
        Ok(rank_top_k(self.semantic_scores(texts, query, config)?, k))
    }

    /// Weighted merge over the union of the two independent top-k lists.
    fn ensemble(
        &self,
        texts: &[&str],
        query: &str,
        config: &RetrievalConfig,
        semantic_weight: f32,
        keyword_weight: f32,
    ) -> Result<Vec<(usize, f32)>, RagError> {
        let k = config.top_k;
        let semantic = self.semantic(texts, query, config, k)?;
        let keyword = Bm25Index::new(texts).top_k(query, k);

        // index -> (semantic, keyword); BTreeMap keeps ties in document order
        let mut merged: BTreeMap<usize, (f32, f32)> = BTreeMap::new();
        for (i, s) in semantic {
            merged.entry(i).or_default().0 = s;
        }
        for (i, kw) in keyword {
            merged.entry(i).or_default().1 = kw;
        }

        let total = semantic_weight + keyword_weight;
        let mut combined: Vec<(usize, f32)> = merged
            .into_iter()
            .map(|(i, (s, kw))| (i, (semantic_weight * s + keyword_weight * kw) / total))
            .collect();
        combined.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        combined.truncate(k);
        Ok(combined)
    }

    /// BM25 shortlist of `2k` candidates, re-ranked semantically.
    fn sequential(
        &self,
        texts: &[&str],
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<Vec<(usize, f32)>, RagError> {
        let k = config.top_k;
        let candidates: Vec<usize> = Bm25Index::new(texts)
            .top_k(query, k.saturating_mul(2))
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(i, _)| i)
            .collect();

        if candidates.is_empty() {
            tracing::debug!("No keyword candidates, falling back to semantic ranking");
            return self.semantic(texts, query, config, k);
        }

        let shortlist: Vec<&str> = candidates.iter().map(|&i| texts[i]).collect();
        Ok(self
            .semantic(&shortlist, query, config, k)?
            .into_iter()
            .map(|(pos, score)| (candidates[pos], score))
            .collect())
    }
}

/// The first `k` chunks in document order, scored [`FALLBACK_SCORE`].
pub fn fallback_chunks(chunks: &[DocumentChunk], k: usize) -> Vec<DocumentChunk> {
    chunks
        .iter()
        .take(k)
        .map(|c| c.clone().with_score(FALLBACK_SCORE))
        .collect()
}

/// The document as one pseudo-chunk, cut to `max_chars` characters.
pub fn full_text_chunk(document: &str, max_chars: usize) -> DocumentChunk {
    let end = document
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(document.len());
    DocumentChunk {
        content: document[..end].to_string(),
        chunk_index: 0,
        section_label: FULL_TEXT_SECTION.to_string(),
        origin: ChunkOrigin::FullText,
        section_part: None,
        start: 0,
        end,
        relevance_score: Some(FULL_TEXT_SCORE),
    }
}

/// Render chunks as numbered, scored blocks separated by blank lines.
pub fn format_context(chunks: &[DocumentChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            format!(
                "[CHUNK {}] (Score: {:.3})\n{}",
                i + 1,
                chunk.relevance_score.unwrap_or(0.0),
                chunk.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rag::{
        EmbeddingModel, LocalModelProvider, ModelProvider, RerankConfig, Reranker,
    };

    const REPORT: &str = "Indication: follow-up of glioblastoma.\n\
        Findings: enhancing lesion in the left frontal lobe measuring 2 cm.\n\
        Medications: temozolomide and dexamethasone 4 mg daily.\n\
        Impression: stable disease, no new lesions.";

    fn retriever() -> ContextRetriever {
        let provider = Arc::new(LocalModelProvider::new("/nonexistent"));
        ContextRetriever::new(Arc::new(ModelCache::new(provider)))
    }

    fn enabled(strategy: RetrievalStrategy) -> RetrievalConfig {
        RetrievalConfig {
            enabled: true,
            strategy,
            top_k: 2,
            embedding_model: "hashing".into(),
            ..Default::default()
        }
    }

    fn assert_scores_in_range(chunks: &[DocumentChunk]) {
        for chunk in chunks {
            let score = chunk.relevance_score.expect("score assigned");
            assert!((0.0..=1.0).contains(&score), "score out of range: {score}");
        }
    }

    #[test]
    fn disabled_returns_full_text() {
        let config = RetrievalConfig::default();
        let ctx = retriever().retrieve_context(REPORT, "anything", &config);
        assert_eq!(ctx.text, REPORT);
        assert_eq!(ctx.chunks.len(), 1);
        assert_eq!(ctx.chunks[0].origin, ChunkOrigin::FullText);
        assert_eq!(ctx.chunks[0].relevance_score, Some(1.0));
    }

    #[test]
    fn disabled_truncates_to_bound() {
        let long = "x".repeat(70_000);
        let config = RetrievalConfig {
            max_context_chars: 65_000,
            ..Default::default()
        };
        let ctx = retriever().retrieve_context(&long, "q", &config);
        assert_eq!(ctx.text.chars().count(), 65_000);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let chunk = full_text_chunk("ééééé", 3);
        assert_eq!(chunk.content, "ééé");
        assert_eq!(chunk.end, "ééé".len());
    }

    #[test]
    fn keyword_strategy_finds_medications() {
        let chunks = retriever().retrieve(REPORT, "dexamethasone", &enabled(RetrievalStrategy::Keyword));
        assert_eq!(chunks[0].section_label, "medications");
        assert_scores_in_range(&chunks);
    }

    #[test]
    fn semantic_strategy_ranks_relevant_section_first() {
        let chunks = retriever().retrieve(
            REPORT,
            "temozolomide dexamethasone",
            &enabled(RetrievalStrategy::Semantic),
        );
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_label, "medications");
        assert_scores_in_range(&chunks);
    }

    #[test]
    fn ensemble_and_hybrid_return_top_k() {
        for strategy in [RetrievalStrategy::ensemble(), RetrievalStrategy::Hybrid] {
            let chunks = retriever().retrieve(REPORT, "stable disease", &enabled(strategy.clone()));
            assert!(chunks.len() <= 2, "{strategy}: {} chunks", chunks.len());
            assert_eq!(chunks[0].section_label, "impression", "{strategy}");
            assert_scores_in_range(&chunks);
        }
    }

    #[test]
    fn hybrid_ignores_configured_weights() {
        let r = retriever();
        let hybrid = r.retrieve(REPORT, "lesion", &enabled(RetrievalStrategy::Hybrid));
        let even = r.retrieve(
            REPORT,
            "lesion",
            &enabled(RetrievalStrategy::Ensemble {
                semantic_weight: 1.0,
                keyword_weight: 1.0,
            }),
        );
        assert_eq!(hybrid, even);
    }

    #[test]
    fn ensemble_weights_shift_scores() {
        let r = retriever();
        let keyword_only = r.retrieve(
            REPORT,
            "lesion",
            &enabled(RetrievalStrategy::Ensemble {
                semantic_weight: 0.0,
                keyword_weight: 1.0,
            }),
        );
        assert!((keyword_only[0].relevance_score.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sequential_uses_keyword_candidates() {
        let chunks =
            retriever().retrieve(REPORT, "temozolomide", &enabled(RetrievalStrategy::Sequential));
        assert_eq!(chunks.len(), 1, "only one chunk mentions the term");
        assert_eq!(chunks[0].section_label, "medications");
    }

    #[test]
    fn sequential_without_keyword_hits_falls_back_to_semantic() {
        let chunks =
            retriever().retrieve(REPORT, "zzz unknown", &enabled(RetrievalStrategy::Sequential));
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.relevance_score != Some(FALLBACK_SCORE)));
    }

    #[test]
    fn missing_embedder_degrades_to_fallback() {
        let config = RetrievalConfig {
            embedding_model: "not-installed".into(),
            ..enabled(RetrievalStrategy::Semantic)
        };
        let ctx = retriever().retrieve_context(REPORT, "lesion", &config);
        assert!(ctx.degraded);
        assert_eq!(ctx.chunks.len(), 2);
        assert_eq!(ctx.chunks[0].section_label, "indication");
        assert!(ctx.chunks.iter().all(|c| c.relevance_score == Some(FALLBACK_SCORE)));
    }

    #[test]
    fn missing_reranker_degrades_to_fallback() {
        let config = RetrievalConfig {
            reranker: Some(RerankConfig::default()),
            ..enabled(RetrievalStrategy::Keyword)
        };
        let ctx = retriever().retrieve_context(REPORT, "lesion", &config);
        assert!(ctx.degraded);
    }

    #[test]
    fn reranker_keeps_top_n() {
        let config = RetrievalConfig {
            top_k: 3,
            reranker: Some(RerankConfig {
                model: "lexical".into(),
                top_n: 1,
            }),
            ..enabled(RetrievalStrategy::Keyword)
        };
        let chunks = retriever().retrieve(REPORT, "new lesions stable", &config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].section_label, "impression");
    }

    #[test]
    fn empty_document_yields_empty_context() {
        let ctx = retriever().retrieve_context("", "q", &enabled(RetrievalStrategy::Keyword));
        assert!(ctx.chunks.is_empty());
        assert!(ctx.text.is_empty());
    }

    #[test]
    fn failing_embedder_degrades() {
        struct Broken;
        impl EmbeddingModel for Broken {
            fn embed(&self, _: &str) -> Result<Vec<f32>, RagError> {
                Err(RagError::EmbeddingFailed("boom".into()))
            }
            fn embed_batch(&self, _: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
                Err(RagError::EmbeddingFailed("boom".into()))
            }
            fn dimension(&self) -> usize {
                0
            }
        }
        struct BrokenProvider;
        impl ModelProvider for BrokenProvider {
            fn load_embedder(&self, _: &str) -> Result<Arc<dyn EmbeddingModel>, RagError> {
                Ok(Arc::new(Broken))
            }
            fn load_reranker(&self, m: &str, _: usize) -> Result<Arc<dyn Reranker>, RagError> {
                Err(RagError::ModelLoad {
                    model: m.into(),
                    reason: "none".into(),
                })
            }
        }

        let retriever = ContextRetriever::new(Arc::new(ModelCache::new(Arc::new(BrokenProvider))));
        let ctx = retriever.retrieve_context(REPORT, "lesion", &enabled(RetrievalStrategy::Hybrid));
        assert!(ctx.degraded);
        assert_eq!(ctx.chunks.len(), 2);
    }

    #[test]
    fn context_format_numbers_chunks() {
        let chunks = fallback_chunks(&SectionChunker::default().chunk(REPORT), 2);
        let text = format_context(&chunks);
        assert!(text.starts_with("[CHUNK 1] (Score: 0.500)\nIndication:"), "got {text}");
        assert!(text.contains("\n\n[CHUNK 2] (Score: 0.500)\nFindings:"));
    }
}
