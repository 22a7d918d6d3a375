use std::collections::HashSet;

use super::keyword::{rank_top_k, tokenize};
use super::types::Reranker;
use super::RagError;

/// Model identifier that selects [`LexicalReranker`].
pub const LEXICAL_RERANKER: &str = "lexical";

/// Scores each document by the fraction of distinct query terms it contains.
///
/// Stands in for a cross-encoder when no reranking model is installed:
/// it looks at the (query, document) pair jointly and yields scores in [0, 1].
pub struct LexicalReranker {
    top_n: usize,
}

impl LexicalReranker {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }
}

impl Reranker for LexicalReranker {
    fn rerank(&self, query: &str, documents: &[&str]) -> Result<Vec<(usize, f32)>, RagError> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        if query_terms.is_empty() {
            return Err(RagError::RerankFailed("query has no terms".into()));
        }

        let scores = documents
            .iter()
            .map(|doc| {
                let doc_terms: HashSet<String> = tokenize(doc).into_iter().collect();
                let hits = query_terms.iter().filter(|t| doc_terms.contains(*t)).count();
                hits as f32 / query_terms.len() as f32
            })
            .collect();

        Ok(rank_top_k(scores, self.top_n))
    }

    fn top_n(&self) -> usize {
        self.top_n
    }
}
