use std::sync::LazyLock;

use regex::Regex;

/// Minimum number of distinct indicator terms for text to count as clinical.
pub const MIN_CLINICAL_INDICATORS: usize = 2;

const MIN_CLINICAL_CHARS: usize = 10;

static CLINICAL_INDICATORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bpatient\b",
        r"(?i)\bdiagnosis\b",
        r"(?i)\btreatment\b",
        r"(?i)\bmedications?\b",
        r"(?i)\bsymptoms?\b",
        r"(?i)\bhospital\b",
        r"(?i)\bclinic\b",
        r"(?i)\bdoctor\b",
        r"(?i)\bnurse\b",
        r"(?i)\btherapy\b",
        r"(?i)\bmedical\b",
        r"(?i)\bclinical\b",
        r"(?i)\bimpression\b",
        r"(?i)\bfindings\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Outcome of the clinical-content heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClinicalScreen {
    pub indicator_count: usize,
    pub is_clinical: bool,
    /// `indicator_count / 5`, capped at 1.0.
    pub confidence: f32,
}

/// Cheap check that a document reads like clinical text.
/// Used only to raise warnings; it never blocks extraction.
pub fn screen_clinical_text(text: &str) -> ClinicalScreen {
    if text.trim().chars().count() < MIN_CLINICAL_CHARS {
        return ClinicalScreen {
            indicator_count: 0,
            is_clinical: false,
            confidence: 0.0,
        };
    }

    let indicator_count = CLINICAL_INDICATORS
        .iter()
        .filter(|re| re.is_match(text))
        .count();

    ClinicalScreen {
        indicator_count,
        is_clinical: indicator_count >= MIN_CLINICAL_INDICATORS,
        confidence: (indicator_count as f32 / 5.0).min(1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clinical_report_passes() {
        let screen = screen_clinical_text(
            "The patient was admitted to hospital. Diagnosis: pneumonia. Treatment started.",
        );
        assert!(screen.is_clinical);
        assert!(screen.indicator_count >= 3);
    }

    #[test]
    fn unrelated_text_fails() {
        let screen = screen_clinical_text("The quarterly sales figures improved in March.");
        assert!(!screen.is_clinical);
        assert_eq!(screen.confidence, 0.0);
    }

    #[test]
    fn short_text_fails() {
        assert!(!screen_clinical_text("patient").is_clinical);
    }

    #[test]
    fn confidence_caps_at_one() {
        let screen = screen_clinical_text(
            "patient diagnosis treatment medication symptom hospital clinic doctor",
        );
        assert_eq!(screen.confidence, 1.0);
    }
}
