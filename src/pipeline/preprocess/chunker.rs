use super::sections::detect_sections;
use super::splitter::{char_len, RecursiveSplitter};
use super::types::{ChunkOrigin, Chunker, DocumentChunk, UNKNOWN_SECTION};

/// Section-aware chunker for normalized medical reports.
///
/// Detected sections become one chunk each when they fit within
/// `chunk_size` characters; larger sections are split recursively and every
/// piece carries a `section_part` index. Documents with no detected
/// sections are split as a whole and labeled `unknown`.
pub struct SectionChunker {
    splitter: RecursiveSplitter,
}

impl SectionChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            splitter: RecursiveSplitter::new(chunk_size, chunk_overlap),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.splitter.chunk_size()
    }

    fn chunk_unsectioned(&self, text: &str) -> Vec<DocumentChunk> {
        self.splitter
            .split_ranges(text, 0..text.len())
            .into_iter()
            .enumerate()
            .map(|(chunk_index, range)| DocumentChunk {
                content: text[range.clone()].to_string(),
                chunk_index,
                section_label: UNKNOWN_SECTION.to_string(),
                origin: ChunkOrigin::Unsectioned,
                section_part: None,
                start: range.start,
                end: range.end,
                relevance_score: None,
            })
            .collect()
    }
}

impl Default for SectionChunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

impl Chunker for SectionChunker {
    fn chunk(&self, text: &str) -> Vec<DocumentChunk> {
        let sections = detect_sections(text);
        if sections.is_empty() {
            return self.chunk_unsectioned(text);
        }

        let mut chunks = Vec::new();
        let mut chunk_index = 0;

        for section in &sections {
            let span = section.text(text);
            let trimmed = span.trim();
            if trimmed.is_empty() {
                continue;
            }

            if char_len(span) <= self.splitter.chunk_size() {
                let start = section.start + (span.len() - span.trim_start().len());
                chunks.push(DocumentChunk {
                    content: trimmed.to_string(),
                    chunk_index,
                    section_label: section.label.to_string(),
                    origin: ChunkOrigin::WholeSection,
                    section_part: None,
                    start,
                    end: start + trimmed.len(),
                    relevance_score: None,
                });
                chunk_index += 1;
                continue;
            }

            let pieces = self
                .splitter
                .split_ranges(text, section.start..section.end);
            for (part, range) in pieces.into_iter().enumerate() {
                chunks.push(DocumentChunk {
                    content: text[range.clone()].to_string(),
                    chunk_index,
                    section_label: section.label.to_string(),
                    origin: ChunkOrigin::SubSplit,
                    section_part: Some(part),
                    start: range.start,
                    end: range.end,
                    relevance_score: None,
                });
                chunk_index += 1;
            }
        }

        tracing::debug!(
            sections = sections.len(),
            chunks = chunks.len(),
            "Chunked sectioned document"
        );
        chunks
    }
}
