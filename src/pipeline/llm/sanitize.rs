use std::sync::LazyLock;

use regex::Regex;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

static UNUSED_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<unused\d+>").expect("valid regex"));

/// Strip reasoning blocks and leaked special tokens from a model reply.
pub fn clean_model_output(raw: &str) -> String {
    let without_think = THINK_BLOCK.replace_all(raw, "");
    UNUSED_TOKEN.replace_all(&without_think, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_blocks() {
        let raw = "<think>\nThe report says benign.\n</think>\n{\"diagnosis\": \"benign\"}";
        assert_eq!(clean_model_output(raw), "{\"diagnosis\": \"benign\"}");
    }

    #[test]
    fn strips_unused_tokens() {
        assert_eq!(clean_model_output("<unused94>benign<unused95>"), "benign");
    }

    #[test]
    fn plain_text_is_trimmed() {
        assert_eq!(clean_model_output("  NR \n"), "NR");
    }

    #[test]
    fn only_think_block_becomes_empty() {
        assert!(clean_model_output("<think>nothing</think>").is_empty());
    }
}
