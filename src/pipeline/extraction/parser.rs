use regex::Regex;
use serde_json::{Map, Value};

use super::types::OutputMode;
use super::validation::CompiledDatapoint;

/// The object between the first `{` and the last `}`, if it parses.
pub fn extract_json_object(raw: &str) -> Option<Map<String, Value>> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&raw[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// A JSON value as a cleaned string; `null` counts as absent.
fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Patterns pulling one key's value from text that is not valid JSON.
///
/// Tried in order: `"key": "value"`, `'key': 'value'`, `key: value`.
/// Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct FallbackPatterns([Regex; 3]);

impl FallbackPatterns {
    pub fn new(key: &str) -> Result<Self, regex::Error> {
        let key = regex::escape(key);
        Ok(Self([
            Regex::new(&format!(r#"(?i)"{key}"\s*:\s*"([^"]+)""#))?,
            Regex::new(&format!(r#"(?i)'{key}'\s*:\s*'([^']+)'"#))?,
            Regex::new(&format!(r#"(?i){key}\s*:\s*([^\s,}}]+)"#))?,
        ]))
    }

    pub fn extract(&self, raw: &str) -> Option<String> {
        self.0.iter().find_map(|re| {
            re.captures(raw)?
                .get(1)
                .map(|m| m.as_str().to_string())
        })
    }
}

/// Cleaned value for one datapoint given the reply and its parsed object.
///
/// A key absent from a parsed object takes the datapoint default. When no
/// object could be parsed, the regex fallback runs; no match also yields the
/// default. Values found either way are validated.
fn resolve(raw: &str, parsed: Option<&Map<String, Value>>, dp: &CompiledDatapoint) -> String {
    let found = match parsed {
        Some(object) => object.get(&dp.spec.result_key).and_then(value_as_string),
        None => dp.fallback_extract(raw),
    };
    match found {
        Some(value) => dp.validate(&value),
        None => dp.spec.default_value.clone(),
    }
}

/// Cleaned values for every datapoint of a single-call reply, in datapoint order.
pub fn parse_single_call(raw: &str, datapoints: &[CompiledDatapoint]) -> Vec<String> {
    let parsed = extract_json_object(raw);
    if parsed.is_none() {
        tracing::debug!("Reply is not a JSON object, using pattern fallback");
    }
    datapoints
        .iter()
        .map(|dp| resolve(raw, parsed.as_ref(), dp))
        .collect()
}

/// Cleaned value for a one-datapoint reply.
pub fn parse_datapoint(raw: &str, dp: &CompiledDatapoint) -> String {
    match dp.spec.output_mode {
        OutputMode::Json => resolve(raw, extract_json_object(raw).as_ref(), dp),
        OutputMode::Text => {
            let text = raw.trim();
            if text.is_empty() {
                dp.spec.default_value.clone()
            } else {
                dp.validate(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::{DatapointSpec, INVALID_VALUE};

    fn compiled(spec: DatapointSpec) -> CompiledDatapoint {
        CompiledDatapoint::compile(&spec).unwrap()
    }

    fn fallback_extract(raw: &str, key: &str) -> Option<String> {
        FallbackPatterns::new(key).unwrap().extract(raw)
    }

    fn diagnosis() -> CompiledDatapoint {
        compiled(
            DatapointSpec::new("diagnosis", "Extract the diagnosis")
                .with_valid_values(&["cancer", "benign", "NR"]),
        )
    }

    #[test]
    fn finds_object_inside_prose() {
        let raw = "Sure! Here you go: {\"k1\": \"v1\", \"k2\": \"v2\"} Hope that helps.";
        let dps = vec![
            compiled(DatapointSpec::new("k1", "a")),
            compiled(DatapointSpec::new("k2", "b")),
        ];
        assert_eq!(parse_single_call(raw, &dps), vec!["v1", "v2"]);
    }

    #[test]
    fn json_value_is_validated() {
        assert_eq!(parse_single_call(r#"{"diagnosis": "benign"}"#, &[diagnosis()]), vec!["benign"]);
        assert_eq!(
            parse_single_call(r#"{"diagnosis": "glioma"}"#, &[diagnosis()]),
            vec![INVALID_VALUE]
        );
    }

    #[test]
    fn missing_key_takes_default() {
        assert_eq!(parse_single_call(r#"{"other": "x"}"#, &[diagnosis()]), vec!["NR"]);
    }

    #[test]
    fn null_counts_as_missing() {
        assert_eq!(parse_single_call(r#"{"diagnosis": null}"#, &[diagnosis()]), vec!["NR"]);
    }

    #[test]
    fn non_string_values_are_stringified() {
        let dps = vec![
            compiled(DatapointSpec::new("size", "a")),
            compiled(DatapointSpec::new("enhancing", "b")),
        ];
        let raw = r#"{"size": 2.5, "enhancing": true}"#;
        assert_eq!(parse_single_call(raw, &dps), vec!["2.5", "true"]);
    }

    #[test]
    fn unparseable_prose_falls_back_to_default() {
        let raw = "The diagnosis is: benign (see notes)";
        assert_eq!(parse_single_call(raw, &[diagnosis()]), vec!["NR"]);
    }

    #[test]
    fn fallback_prefers_double_quoted() {
        let raw = r#"{"diagnosis": "benign", 'diagnosis': 'cancer' broken"#;
        assert_eq!(fallback_extract(raw, "diagnosis").as_deref(), Some("benign"));
    }

    #[test]
    fn fallback_single_quoted() {
        let raw = "{'diagnosis': 'cancer'}";
        assert_eq!(parse_single_call(raw, &[diagnosis()]), vec!["cancer"]);
    }

    #[test]
    fn fallback_bare_token_is_case_insensitive() {
        let raw = "Diagnosis: benign, confidence high";
        assert_eq!(fallback_extract(raw, "diagnosis").as_deref(), Some("benign"));
    }

    #[test]
    fn fallback_values_are_validated() {
        let raw = "diagnosis: glioma";
        assert_eq!(parse_single_call(raw, &[diagnosis()]), vec![INVALID_VALUE]);
    }

    #[test]
    fn keys_with_regex_metacharacters_are_escaped() {
        let raw = "size(cm): 3";
        assert_eq!(fallback_extract(raw, "size(cm)").as_deref(), Some("3"));
    }

    #[test]
    fn compiled_fallback_reads_result_key_on_every_reply() {
        let mut spec = DatapointSpec::new("size", "Extract");
        spec.result_key = "lesion_size_cm".into();
        let dp = compiled(spec);

        assert_eq!(parse_datapoint("lesion_size_cm: 2.1, margins clear", &dp), "2.1");
        assert_eq!(parse_datapoint("'LESION_SIZE_CM': '4.0'", &dp), "4.0");
        assert_eq!(parse_datapoint("size: 9", &dp), "NR", "the name is not the key");
        assert_eq!(dp.fallback_extract(r#""lesion_size_cm": "3 cm""#).as_deref(), Some("3 cm"));
    }

    #[test]
    fn text_mode_uses_trimmed_reply() {
        let dp = compiled(
            DatapointSpec::new("summary", "Summarize")
                .with_output_mode(crate::pipeline::extraction::OutputMode::Text),
        );
        assert_eq!(parse_datapoint("  stable disease \n", &dp), "stable disease");
        assert_eq!(parse_datapoint("   ", &dp), "NR");
    }

    #[test]
    fn datapoint_json_mode_reads_result_key() {
        let mut spec = DatapointSpec::new("size", "Extract");
        spec.result_key = "lesion_size_cm".into();
        let dp = compiled(spec);
        assert_eq!(parse_datapoint(r#"{"lesion_size_cm": "2.1"}"#, &dp), "2.1");
    }

    #[test]
    fn reversed_braces_are_not_json() {
        assert!(extract_json_object("} nothing {").is_none());
        assert!(extract_json_object("[1, 2]").is_none());
    }
}
