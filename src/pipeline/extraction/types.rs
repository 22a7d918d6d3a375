use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ExtractionError;
use crate::pipeline::llm::{ModelConfig, Role};
use crate::pipeline::rag::RetrievalConfig;

/// Sentinel for a value rejected by validation.
pub const INVALID_VALUE: &str = "invalid";

/// Default for datapoints the model did not report.
pub const NOT_REPORTED: &str = "NR";

/// Values that carry no information: "not reported", "unknown", empty.
pub const VACUOUS_VALUES: &[&str] = &["NR", "unknown", ""];

pub fn is_vacuous(value: &str) -> bool {
    VACUOUS_VALUES.contains(&value)
}

fn default_not_reported() -> String {
    NOT_REPORTED.to_string()
}

fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════
// Datapoints
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Value read from a JSON object under `result_key`.
    #[default]
    Json,
    /// The whole (trimmed) reply is the value.
    Text,
}

/// A fixed turn placed before the task message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub role: Role,
    pub content: String,
}

/// A named extraction target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointSpec {
    pub name: String,
    pub instruction: String,
    /// Key expected in the model's JSON reply.
    pub result_key: String,
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Closed set of accepted values, when non-empty.
    #[serde(default)]
    pub valid_values: Vec<String>,
    /// Regex the value must match from its first character.
    #[serde(default)]
    pub validation_pattern: Option<String>,
    #[serde(default)]
    pub few_shot_examples: Vec<FewShotExample>,
    #[serde(default = "default_not_reported")]
    pub default_value: String,
    /// Replaces the generic system prompt in multi-call mode.
    #[serde(default)]
    pub system_message: Option<String>,
    /// Informational; surfaced in reports.
    #[serde(default = "default_true")]
    pub required: bool,
}

impl DatapointSpec {
    /// A JSON datapoint whose result key equals its name.
    pub fn new(name: &str, instruction: &str) -> Self {
        Self {
            name: name.to_string(),
            instruction: instruction.to_string(),
            result_key: name.to_string(),
            output_mode: OutputMode::Json,
            valid_values: Vec::new(),
            validation_pattern: None,
            few_shot_examples: Vec::new(),
            default_value: default_not_reported(),
            system_message: None,
            required: true,
        }
    }

    pub fn with_valid_values(mut self, values: &[&str]) -> Self {
        self.valid_values = values.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.validation_pattern = Some(pattern.to_string());
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn has_valid_values(&self) -> bool {
        !self.valid_values.is_empty()
    }

    pub fn raw_column(&self) -> String {
        format!("{}_raw", self.name)
    }

    pub fn cleaned_column(&self) -> String {
        format!("{}_cleaned", self.name)
    }

    pub fn confidence_column(&self) -> String {
        format!("{}_confidence", self.name)
    }
}

/// Check a datapoint list before any row is processed.
pub fn validate_datapoints(datapoints: &[DatapointSpec]) -> Result<(), ExtractionError> {
    if datapoints.is_empty() {
        return Err(ExtractionError::InvalidConfig(
            "at least one datapoint is required".into(),
        ));
    }

    let mut names = HashSet::new();
    let mut keys = HashSet::new();
    for dp in datapoints {
        if dp.name.trim().is_empty() || dp.result_key.trim().is_empty() {
            return Err(ExtractionError::InvalidConfig(
                "datapoint name and result_key must be non-empty".into(),
            ));
        }
        if !names.insert(dp.name.as_str()) {
            return Err(ExtractionError::InvalidConfig(format!(
                "duplicate datapoint name '{}'",
                dp.name
            )));
        }
        if !keys.insert(dp.result_key.as_str()) {
            return Err(ExtractionError::InvalidConfig(format!(
                "duplicate result_key '{}'",
                dp.result_key
            )));
        }
        // The default is a fallback sentinel, never a validator output.
        if dp.has_valid_values() && !dp.valid_values.contains(&dp.default_value) {
            tracing::debug!(
                datapoint = %dp.name,
                default = %dp.default_value,
                "Default value lies outside valid_values"
            );
        }
        if let Some(pattern) = &dp.validation_pattern {
            regex::Regex::new(pattern).map_err(|e| ExtractionError::InvalidPattern {
                datapoint: dp.name.clone(),
                reason: e.to_string(),
            })?;
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════
// Run configuration
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// All datapoints in one model call per row.
    #[default]
    SingleCall,
    /// One model call per datapoint per row.
    MultiCall,
    /// Staged decision-tree extraction. Not implemented: runs as
    /// `MultiCall` and logs a warning once per job.
    Workflow,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleCall => "single_call",
            Self::MultiCall => "multi_call",
            Self::Workflow => "workflow",
        }
    }
}

impl std::fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Row budget, checkpointing and error tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Rows processed when `process_all` is false.
    pub batch_size: usize,
    pub process_all: bool,
    /// Checkpoint every N rows.
    pub save_frequency: usize,
    pub use_checkpoints: bool,
    pub cleanup_checkpoint_on_completion: bool,
    pub skip_errors: bool,
    pub max_errors: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            process_all: false,
            save_frequency: 10,
            use_checkpoints: true,
            cleanup_checkpoint_on_completion: false,
            skip_errors: true,
            max_errors: 50,
        }
    }
}

impl ProcessingConfig {
    /// Number of leading rows of a `total`-row dataset to process.
    pub fn row_budget(&self, total: usize) -> usize {
        if self.process_all {
            total
        } else {
            total.min(self.batch_size)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub enabled: bool,
    pub ground_truth_column: Option<String>,
    /// Named ordinal scale for distance metrics (`bt_rads`).
    pub ordinal_scale: Option<String>,
}

/// Everything one extraction job needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub datapoints: Vec<DatapointSpec>,
    #[serde(default)]
    pub strategy: ExtractionStrategy,
    #[serde(default = "default_text_column")]
    pub text_column: String,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

pub const DEFAULT_TEXT_COLUMN: &str = "Report Text";

fn default_text_column() -> String {
    DEFAULT_TEXT_COLUMN.to_string()
}

impl ExtractionConfig {
    pub fn new(datapoints: Vec<DatapointSpec>) -> Self {
        Self {
            datapoints,
            strategy: ExtractionStrategy::default(),
            text_column: default_text_column(),
            retrieval: RetrievalConfig::default(),
            model: ModelConfig::default(),
            processing: ProcessingConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }

    /// Reject configurations that cannot run. Dataset-dependent checks
    /// (text column presence) happen when the job starts.
    pub fn validate(&self) -> Result<(), ExtractionError> {
        validate_datapoints(&self.datapoints)?;
        if self.text_column.trim().is_empty() {
            return Err(ExtractionError::InvalidConfig("text_column must be set".into()));
        }
        self.retrieval.validate()?;
        self.model.validate()?;
        if self.processing.save_frequency == 0 {
            return Err(ExtractionError::InvalidConfig(
                "save_frequency must be positive".into(),
            ));
        }
        if self.processing.max_errors == 0 {
            return Err(ExtractionError::InvalidConfig("max_errors must be positive".into()));
        }
        if self.evaluation.enabled && self.evaluation.ground_truth_column.is_none() {
            return Err(ExtractionError::InvalidConfig(
                "evaluation requires ground_truth_column".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::rag::RetrievalStrategy;

    fn diagnosis() -> DatapointSpec {
        DatapointSpec::new("diagnosis", "Extract the diagnosis.")
            .with_valid_values(&["cancer", "benign", "NR"])
    }

    #[test]
    fn datapoint_defaults_from_json() {
        let dp: DatapointSpec = serde_json::from_str(
            r#"{"name":"grade","instruction":"Extract grade","result_key":"grade"}"#,
        )
        .unwrap();
        assert_eq!(dp.default_value, "NR");
        assert_eq!(dp.output_mode, OutputMode::Json);
        assert!(dp.required);
        assert!(dp.few_shot_examples.is_empty());
    }

    #[test]
    fn column_names_follow_datapoint_name() {
        let dp = diagnosis();
        assert_eq!(dp.raw_column(), "diagnosis_raw");
        assert_eq!(dp.cleaned_column(), "diagnosis_cleaned");
        assert_eq!(dp.confidence_column(), "diagnosis_confidence");
    }

    #[test]
    fn empty_datapoint_list_rejected() {
        assert!(matches!(
            validate_datapoints(&[]),
            Err(ExtractionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut other = diagnosis();
        other.result_key = "dx2".into();
        let err = validate_datapoints(&[diagnosis(), other]).unwrap_err();
        assert!(err.to_string().contains("duplicate datapoint name"), "got {err}");
    }

    #[test]
    fn duplicate_result_keys_rejected() {
        let mut other = diagnosis();
        other.name = "diagnosis_2".into();
        let err = validate_datapoints(&[diagnosis(), other]).unwrap_err();
        assert!(err.to_string().contains("duplicate result_key"), "got {err}");
    }

    #[test]
    fn bad_pattern_rejected() {
        let dp = DatapointSpec::new("size", "Extract size").with_pattern("([0-9]+");
        assert!(matches!(
            validate_datapoints(&[dp]),
            Err(ExtractionError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn default_outside_valid_values_accepted() {
        let dp = DatapointSpec::new("side", "Extract side").with_valid_values(&["left", "right"]);
        assert!(validate_datapoints(&[dp]).is_ok());
    }

    #[test]
    fn config_defaults() {
        let config = ExtractionConfig::new(vec![diagnosis()]);
        assert_eq!(config.text_column, "Report Text");
        assert_eq!(config.strategy, ExtractionStrategy::SingleCall);
        assert_eq!(config.processing.batch_size, 100);
        assert_eq!(config.processing.max_errors, 50);
        assert!(config.processing.skip_errors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_parses_from_minimal_json() {
        let config: ExtractionConfig = serde_json::from_str(
            r#"{
                "datapoints": [{"name":"dx","instruction":"Extract","result_key":"dx"}],
                "strategy": "multi_call",
                "retrieval": {"enabled": true, "strategy": {"type": "keyword"}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.strategy, ExtractionStrategy::MultiCall);
        assert!(config.retrieval.enabled);
        assert_eq!(config.retrieval.strategy, RetrievalStrategy::Keyword);
        assert_eq!(config.model.max_retries, 3);
    }

    #[test]
    fn zero_save_frequency_rejected() {
        let mut config = ExtractionConfig::new(vec![diagnosis()]);
        config.processing.save_frequency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_retrieval_config_rejected() {
        let mut config = ExtractionConfig::new(vec![diagnosis()]);
        config.retrieval.chunk_overlap = config.retrieval.chunk_size;
        assert!(matches!(config.validate(), Err(ExtractionError::Retrieval(_))));
    }

    #[test]
    fn row_budget_caps_unless_process_all() {
        let mut processing = ProcessingConfig::default();
        assert_eq!(processing.row_budget(250), 100);
        assert_eq!(processing.row_budget(40), 40);
        processing.process_all = true;
        assert_eq!(processing.row_budget(250), 250);
    }

    #[test]
    fn vacuous_values() {
        assert!(is_vacuous("NR"));
        assert!(is_vacuous("unknown"));
        assert!(is_vacuous(""));
        assert!(!is_vacuous("benign"));
    }
}
