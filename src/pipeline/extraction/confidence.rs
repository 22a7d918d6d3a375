use super::types::{is_vacuous, DatapointSpec, INVALID_VALUE};

/// Confidence levels assigned to cleaned values
pub mod confidence_levels {
    /// Rejected by validation.
    pub const INVALID: f32 = 0.0;

    /// "NR", "unknown" or empty.
    pub const VACUOUS: f32 = 0.3;

    /// Accepted, but no closed value set to check against.
    pub const ACCEPTED: f32 = 0.7;

    /// Member of the datapoint's valid values.
    pub const ALLOW_LISTED: f32 = 0.9;
}

/// Deterministic confidence for a cleaned value.
pub fn score_confidence(cleaned: &str, spec: &DatapointSpec) -> f32 {
    if cleaned == INVALID_VALUE {
        confidence_levels::INVALID
    } else if is_vacuous(cleaned) {
        confidence_levels::VACUOUS
    } else if spec.valid_values.iter().any(|v| v == cleaned) {
        confidence_levels::ALLOW_LISTED
    } else {
        confidence_levels::ACCEPTED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> DatapointSpec {
        DatapointSpec::new("diagnosis", "Extract").with_valid_values(&["cancer", "benign", "NR"])
    }

    #[test]
    fn invalid_scores_zero() {
        assert_eq!(score_confidence("invalid", &spec()), 0.0);
    }

    #[test]
    fn vacuous_scores_low_even_when_allow_listed() {
        assert_eq!(score_confidence("NR", &spec()), 0.3);
        assert_eq!(score_confidence("unknown", &spec()), 0.3);
        assert_eq!(score_confidence("", &spec()), 0.3);
    }

    #[test]
    fn allow_listed_scores_high() {
        assert_eq!(score_confidence("benign", &spec()), 0.9);
    }

    #[test]
    fn free_value_scores_medium() {
        let free = DatapointSpec::new("size", "Extract");
        assert_eq!(score_confidence("2 cm", &free), 0.7);
    }

    #[test]
    fn confidence_is_monotonic_with_validity() {
        let s = spec();
        let free = DatapointSpec::new("size", "Extract");
        let invalid = score_confidence("invalid", &s);
        let vacuous = score_confidence("NR", &s);
        let accepted = score_confidence("2 cm", &free);
        let listed = score_confidence("cancer", &s);
        assert!(invalid < vacuous && vacuous < accepted && accepted <= listed);
    }
}
