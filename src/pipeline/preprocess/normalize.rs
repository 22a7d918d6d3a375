use std::sync::LazyLock;

use regex::{Captures, Regex};

static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Longest run of line breaks kept in normalized text.
pub const MAX_CONSECUTIVE_NEWLINES: usize = 3;

/// Normalize raw document text into its canonical form.
///
/// Steps, in order:
/// 1. Typographic quotes, dashes and ellipses become ASCII.
/// 2. Control characters are dropped, except newline, tab and carriage return.
/// 3. Runs of 4+ newlines are capped at 3.
/// 4. Every other whitespace run collapses to one space; runs containing
///    line breaks keep up to 3 of them so paragraph breaks survive.
/// 5. Leading and trailing whitespace is trimmed.
///
/// The result is idempotent: `normalize_text(&normalize_text(x)) == normalize_text(x)`.
pub fn normalize_text(raw: &str) -> String {
    let ascii = normalize_punctuation(raw);
    let printable = strip_non_printable(&ascii);
    let capped = EXCESS_NEWLINES.replace_all(&printable, "\n\n\n");
    let collapsed = collapse_whitespace(&capped);
    collapsed.trim().to_string()
}

/// Missing text normalizes to the empty string.
pub fn normalize_optional(raw: Option<&str>) -> String {
    raw.map(normalize_text).unwrap_or_default()
}

fn normalize_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{00A0}' => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

fn strip_non_printable(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN
        .replace_all(text, |caps: &Captures| {
            let newlines = caps[0].chars().filter(|&c| c == '\n').count();
            if newlines == 0 {
                " ".to_string()
            } else {
                "\n".repeat(newlines.min(MAX_CONSECUTIVE_NEWLINES))
            }
        })
        .into_owned()
}
