use regex::Regex;

use super::confidence::score_confidence;
use super::parser::FallbackPatterns;
use super::types::{DatapointSpec, INVALID_VALUE};
use super::ExtractionError;

/// A datapoint with its validation and fallback patterns compiled once per job.
#[derive(Debug, Clone)]
pub struct CompiledDatapoint {
    pub spec: DatapointSpec,
    pattern: Option<Regex>,
    fallback: FallbackPatterns,
}

impl CompiledDatapoint {
    pub fn compile(spec: &DatapointSpec) -> Result<Self, ExtractionError> {
        // Anchored at the start only: "12 mm" matches `\d+`.
        let pattern = spec
            .validation_pattern
            .as_deref()
            .map(|p| {
                Regex::new(&format!("^(?:{p})")).map_err(|e| ExtractionError::InvalidPattern {
                    datapoint: spec.name.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;
        let fallback = FallbackPatterns::new(&spec.result_key).map_err(|e| ExtractionError::InvalidPattern {
            datapoint: spec.name.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            spec: spec.clone(),
            pattern,
            fallback,
        })
    }

    pub fn compile_all(specs: &[DatapointSpec]) -> Result<Vec<Self>, ExtractionError> {
        specs.iter().map(Self::compile).collect()
    }

    /// The value itself when accepted, otherwise [`INVALID_VALUE`].
    pub fn validate(&self, value: &str) -> String {
        if self.spec.has_valid_values() && !self.spec.valid_values.iter().any(|v| v == value) {
            return INVALID_VALUE.to_string();
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(value) {
                return INVALID_VALUE.to_string();
            }
        }
        value.to_string()
    }

    /// This datapoint's raw value from a reply that is not valid JSON.
    pub fn fallback_extract(&self, raw: &str) -> Option<String> {
        self.fallback.extract(raw)
    }

    pub fn confidence(&self, cleaned: &str) -> f32 {
        score_confidence(cleaned, &self.spec)
    }
}
