use std::sync::LazyLock;

use regex::Regex;

use super::types::Section;

/// Label for text that precedes the first detected header.
pub const PREAMBLE_SECTION: &str = "preamble";

/// Medical report headers in priority order: (header text, section label).
/// Matching is case-insensitive and anchored at a word boundary.
const SECTION_HEADERS: &[(&str, &str)] = &[
    ("Chief Complaint:", "chief_complaint"),
    ("History of Present Illness:", "present_illness"),
    ("Oncology Treatment History:", "treatment_history"),
    ("Past Medical History:", "past_medical"),
    ("Past Surgical History:", "past_surgical"),
    ("Current Medications:", "current_medications"),
    ("Medications:", "medications"),
    ("Treatment to be received:", "treatment_plan"),
    ("Allergies:", "allergies"),
    ("Social History:", "social_history"),
    ("Review of Systems:", "review_systems"),
    ("Physical Exam:", "physical_exam"),
    ("Subjective:", "subjective"),
    ("Objective:", "objective"),
    ("Laboratory:", "laboratory"),
    ("Imaging:", "imaging"),
    ("Assessment & Plan:", "assessment_plan"),
    ("Assessment:", "assessment"),
    ("Plan:", "plan"),
    ("Impression:", "impression"),
    ("IMP:", "impression"),
    ("Conclusion:", "impression"),
    ("Summary:", "impression"),
    ("Findings:", "findings"),
    ("Indication:", "indication"),
    ("Reason for Exam:", "indication"),
    ("History:", "indication"),
    ("DX:", "indication"),
];

static HEADER_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    SECTION_HEADERS
        .iter()
        .filter_map(|(header, label)| {
            Regex::new(&format!(r"(?i)\b{}", regex::escape(header)))
                .ok()
                .map(|re| (re, *label))
        })
        .collect()
});

#[derive(Debug, Clone, Copy)]
struct HeaderMatch {
    label: &'static str,
    start: usize,
    end: usize,
    priority: usize,
}

impl HeaderMatch {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Detect section boundaries in a normalized document.
///
/// Returns sections sorted by start offset. Each section runs from its
/// header to the next header, or to end of text for the last one. When any
/// header is found, text before the first header becomes a `preamble`
/// section, so the result always partitions `[0, text.len())`.
///
/// A header lying strictly inside a longer header that starts earlier is
/// ignored (`History:` inside `Social History:`). Headers starting at the
/// same offset are all kept: the longest one owns the span, ties going to
/// the earlier entry in the header list, and the others become zero-length
/// sections.
///
/// A document with no matching header yields no sections.
pub fn detect_sections(text: &str) -> Vec<Section> {
    let mut matches: Vec<HeaderMatch> = Vec::new();
    for (priority, (pattern, label)) in HEADER_PATTERNS.iter().enumerate() {
        for m in pattern.find_iter(text) {
            matches.push(HeaderMatch {
                label,
                start: m.start(),
                end: m.end(),
                priority,
            });
        }
    }

    let nested: Vec<bool> = matches
        .iter()
        .map(|m| {
            matches
                .iter()
                .any(|outer| outer.start < m.start && m.end <= outer.end)
        })
        .collect();
    let mut headers: Vec<HeaderMatch> = matches
        .into_iter()
        .zip(nested)
        .filter_map(|(m, is_nested)| (!is_nested).then_some(m))
        .collect();

    // The winner of an offset tie must sort last so it owns the span.
    headers.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(a.len().cmp(&b.len()))
            .then(b.priority.cmp(&a.priority))
    });

    let Some(first) = headers.first() else {
        return Vec::new();
    };

    let mut sections = Vec::with_capacity(headers.len() + 1);
    if first.start > 0 {
        sections.push(Section {
            label: PREAMBLE_SECTION,
            start: 0,
            end: first.start,
        });
    }

    for (i, header) in headers.iter().enumerate() {
        let end = headers.get(i + 1).map_or(text.len(), |next| next.start);
        sections.push(Section {
            label: header.label,
            start: header.start,
            end,
        });
    }

    sections
}

/// Text of the first section with the given label, if any.
pub fn extract_section<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    detect_sections(text)
        .into_iter()
        .find(|s| s.label == label && !s.is_empty())
        .map(|s| s.text(text).trim())
}
