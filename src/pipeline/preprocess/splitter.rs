use std::collections::VecDeque;
use std::ops::Range;

/// Separator priority: paragraph, line, sentence, bare period, word.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", ".", " "];

/// Length in characters, the unit chunk sizes are expressed in.
pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Recursive character splitter.
///
/// Splits on the highest-priority separator present in the text, merges
/// adjacent pieces up to `chunk_size` characters with `chunk_overlap`
/// characters carried between consecutive chunks, and recurses into any
/// piece that is still too long using the remaining separators. Separators
/// stay attached to the start of the following piece, so every produced
/// range is an exact slice of the input.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &'static [&'static str],
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            separators: DEFAULT_SEPARATORS,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text[range]` into whitespace-trimmed, non-empty byte ranges of `text`.
    pub fn split_ranges(&self, text: &str, range: Range<usize>) -> Vec<Range<usize>> {
        self.split_recursive(text, range, self.separators)
            .into_iter()
            .filter_map(|r| trim_range(text, r))
            .collect()
    }

    /// Split a whole string into trimmed pieces.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.split_ranges(text, 0..text.len())
            .into_iter()
            .map(|r| &text[r])
            .collect()
    }

    fn split_recursive(
        &self,
        text: &str,
        range: Range<usize>,
        separators: &[&str],
    ) -> Vec<Range<usize>> {
        let piece = &text[range.clone()];
        let Some(idx) = separators.iter().position(|sep| piece.contains(sep)) else {
            return vec![range];
        };
        let separator = separators[idx];
        let remaining = &separators[idx + 1..];

        let mut out = Vec::new();
        let mut small: Vec<Range<usize>> = Vec::new();

        for split in split_keeping_separator(text, range, separator) {
            if char_len(&text[split.clone()]) < self.chunk_size {
                small.push(split);
                continue;
            }
            if !small.is_empty() {
                out.extend(self.merge(text, &small));
                small.clear();
            }
            if remaining.is_empty() {
                out.push(split);
            } else {
                out.extend(self.split_recursive(text, split, remaining));
            }
        }

        if !small.is_empty() {
            out.extend(self.merge(text, &small));
        }
        out
    }

    /// Merge contiguous small pieces into chunks, carrying overlap forward.
    fn merge(&self, text: &str, splits: &[Range<usize>]) -> Vec<Range<usize>> {
        let mut merged = Vec::new();
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let len = char_len(&text[split.clone()]);
            if total + len > self.chunk_size && !window.is_empty() {
                if let Some(range) = window_range(&window) {
                    merged.push(range);
                }
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((split.clone(), len));
            total += len;
        }

        if let Some(range) = window_range(&window) {
            merged.push(range);
        }
        merged
    }
}

fn window_range(window: &VecDeque<(Range<usize>, usize)>) -> Option<Range<usize>> {
    let first = window.front()?;
    let last = window.back()?;
    Some(first.0.start..last.0.end)
}

/// Cut `text[range]` before every occurrence of `separator`.
fn split_keeping_separator(text: &str, range: Range<usize>, separator: &str) -> Vec<Range<usize>> {
    let piece = &text[range.clone()];
    let mut cuts: Vec<usize> = piece
        .match_indices(separator)
        .map(|(pos, _)| range.start + pos)
        .collect();
    cuts.push(range.end);

    let mut pieces = Vec::with_capacity(cuts.len());
    let mut start = range.start;
    for cut in cuts {
        if cut > start {
            pieces.push(start..cut);
        }
        start = cut;
    }
    pieces
}

fn trim_range(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    let slice = &text[range.clone()];
    let trimmed_start = slice.trim_start();
    if trimmed_start.is_empty() {
        return None;
    }
    let lead = slice.len() - trimmed_start.len();
    let trail = trimmed_start.len() - trimmed_start.trim_end().len();
    Some(range.start + lead..range.end - trail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_piece() {
        let splitter = RecursiveSplitter::new(100, 10);
        assert_eq!(splitter.split("A short note."), vec!["A short note."]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        let splitter = RecursiveSplitter::new(100, 10);
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("   \n ").is_empty());
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let splitter = RecursiveSplitter::new(30, 0);
        let pieces = splitter.split(text);
        assert_eq!(pieces, vec!["First paragraph here.", "Second paragraph here."]);
    }

    #[test]
    fn pieces_respect_chunk_size() {
        let text = "The patient reports mild headache. No fever. ".repeat(40);
        let splitter = RecursiveSplitter::new(120, 20);
        let pieces = splitter.split(&text);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(char_len(piece) <= 120, "piece too long: {}", char_len(piece));
        }
    }

    #[test]
    fn consecutive_pieces_overlap() {
        let text = (0..60).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let splitter = RecursiveSplitter::new(50, 15);
        let ranges = splitter.split_ranges(&text, 0..text.len());
        assert!(ranges.len() > 2);
        for pair in ranges.windows(2) {
            assert!(
                pair[1].start < pair[0].end,
                "expected overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn ranges_are_exact_slices() {
        let text = "Alpha beta.\nGamma delta.\n\nEpsilon zeta eta theta.";
        let splitter = RecursiveSplitter::new(15, 0);
        for range in splitter.split_ranges(text, 0..text.len()) {
            let slice = &text[range.clone()];
            assert_eq!(slice, slice.trim(), "range {range:?} not trimmed");
            assert!(!slice.is_empty());
        }
    }

    #[test]
    fn unbreakable_token_is_kept_whole() {
        let token = "x".repeat(80);
        let splitter = RecursiveSplitter::new(30, 5);
        assert_eq!(splitter.split(&token), vec![token.as_str()]);
    }

    #[test]
    fn overlap_clamped_below_chunk_size() {
        let splitter = RecursiveSplitter::new(10, 50);
        assert_eq!(splitter.chunk_overlap(), 9);
    }

    #[test]
    fn handles_multibyte_text() {
        let text = "Température élevée à 39°C. ".repeat(20);
        let splitter = RecursiveSplitter::new(40, 10);
        for piece in splitter.split(&text) {
            assert!(char_len(piece) <= 40);
        }
    }
}
