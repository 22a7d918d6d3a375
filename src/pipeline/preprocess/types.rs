use serde::{Deserialize, Serialize};

/// Section label for chunks cut from a document with no detected headers.
pub const UNKNOWN_SECTION: &str = "unknown";

/// Section label for the pseudo-chunk used when retrieval is disabled.
pub const FULL_TEXT_SECTION: &str = "full_text";

/// How a chunk was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkOrigin {
    /// A whole section that fit within the chunk size.
    #[serde(rename = "section_chunk")]
    WholeSection,
    /// One piece of a section that had to be split.
    #[serde(rename = "section_subchunk")]
    SubSplit,
    /// A piece of a document with no detected sections.
    #[serde(rename = "regular_chunk")]
    Unsectioned,
    /// The (truncated) document itself, when retrieval is disabled.
    #[serde(rename = "full_text")]
    FullText,
}

impl ChunkOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WholeSection => "section_chunk",
            Self::SubSplit => "section_subchunk",
            Self::Unsectioned => "regular_chunk",
            Self::FullText => "full_text",
        }
    }
}

impl std::fmt::Display for ChunkOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A labeled span of a normalized document.
///
/// Created by the chunker. The retriever only ever fills in
/// `relevance_score`; every other field is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub content: String,
    pub chunk_index: usize,
    pub section_label: String,
    pub origin: ChunkOrigin,
    /// Sub-index within the parent section, for `SubSplit` chunks.
    pub section_part: Option<usize>,
    pub start: usize,
    pub end: usize,
    pub relevance_score: Option<f32>,
}

impl DocumentChunk {
    pub fn with_score(mut self, score: f32) -> Self {
        self.relevance_score = Some(score);
        self
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A detected section: `[start, end)` of the normalized document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub label: &'static str,
    pub start: usize,
    pub end: usize,
}

impl Section {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn text<'a>(&self, document: &'a str) -> &'a str {
        &document[self.start..self.end]
    }
}

/// Chunking strategy trait
pub trait Chunker {
    fn chunk(&self, text: &str) -> Vec<DocumentChunk>;
}
