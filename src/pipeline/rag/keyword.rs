use std::collections::HashMap;

const BM25_K1: f32 = 1.5;
const BM25_B: f32 = 0.75;

/// Lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Okapi BM25 over a fixed set of documents.
pub struct Bm25Index {
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avg_len: f32,
}

impl Bm25Index {
    pub fn new(documents: &[&str]) -> Self {
        let mut term_freqs = Vec::with_capacity(documents.len());
        let mut doc_lens = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let tokens = tokenize(doc);
            doc_lens.push(tokens.len());
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let total: usize = doc_lens.iter().sum();
        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            total as f32 / doc_lens.len() as f32
        };

        Self {
            term_freqs,
            doc_lens,
            doc_freq,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.len() as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Raw BM25 score of every document, in document order.
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let terms = tokenize(query);
        let avg_len = self.avg_len.max(1.0);

        self.term_freqs
            .iter()
            .zip(&self.doc_lens)
            .map(|(tf, &len)| {
                terms
                    .iter()
                    .map(|term| {
                        let f = tf.get(term).copied().unwrap_or(0) as f32;
                        if f == 0.0 {
                            return 0.0;
                        }
                        let norm = 1.0 - BM25_B + BM25_B * len as f32 / avg_len;
                        self.idf(term) * f * (BM25_K1 + 1.0) / (f + BM25_K1 * norm)
                    })
                    .sum()
            })
            .collect()
    }

    /// Scores scaled into [0, 1] by the best document's score.
    pub fn normalized_scores(&self, query: &str) -> Vec<f32> {
        let raw = self.scores(query);
        let max = raw.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return vec![0.0; raw.len()];
        }
        raw.into_iter().map(|s| s / max).collect()
    }

    /// Best `k` documents as `(index, normalized score)`, ties in document order.
    pub fn top_k(&self, query: &str, k: usize) -> Vec<(usize, f32)> {
        rank_top_k(self.normalized_scores(query), k)
    }
}

/// Sort `(index, score)` pairs by descending score and keep `k`.
/// The sort is stable, so equal scores keep document order.
pub fn rank_top_k(scores: Vec<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(k);
    ranked
}
