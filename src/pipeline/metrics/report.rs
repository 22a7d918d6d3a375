use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::classification::{classification_metrics, ClassificationMetrics};
use super::ordinal::{general_category_metrics, ordinal_distance, OrdinalMetrics, OrdinalScale};
use super::quality::{confidence_metrics, quality_metrics, ConfidenceMetrics, QualityMetrics};
use crate::pipeline::dataset::ResultTable;
use crate::pipeline::extraction::{DatapointSpec, EvaluationConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_rows: usize,
    pub processed_rows: usize,
    pub datapoints_extracted: usize,
    pub has_ground_truth: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointReport {
    pub required: bool,
    pub quality: QualityMetrics,
    pub confidence: Option<ConfidenceMetrics>,
    /// Present only when ground truth was compared.
    pub accuracy: Option<ClassificationMetrics>,
    /// Accuracy after collapsing sub-grades of the ordinal scale.
    pub general_category_accuracy: Option<ClassificationMetrics>,
    pub ordinal: Option<OrdinalMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub summary: ReportSummary,
    pub datapoint_metrics: BTreeMap<String, DatapointReport>,
}

/// The ground-truth column to compare against, if evaluation is on and the
/// column exists.
fn ground_truth_column<'a>(table: &ResultTable, evaluation: &'a EvaluationConfig) -> Option<&'a str> {
    if !evaluation.enabled {
        return None;
    }
    evaluation
        .ground_truth_column
        .as_deref()
        .filter(|c| table.source().has_column(c))
}

/// Evaluate every datapoint over the processed rows of `table`.
///
/// Ground-truth comparison skips rows whose truth cell is empty.
pub fn evaluate(
    table: &ResultTable,
    datapoints: &[DatapointSpec],
    evaluation: &EvaluationConfig,
) -> EvaluationReport {
    let truth_column = ground_truth_column(table, evaluation);
    let scale = evaluation
        .ordinal_scale
        .as_deref()
        .and_then(OrdinalScale::by_name);
    if let (Some(name), None) = (evaluation.ordinal_scale.as_deref(), &scale) {
        tracing::warn!(scale = %name, "Unknown ordinal scale, skipping distance metrics");
    }

    let mut datapoint_metrics = BTreeMap::new();
    for dp in datapoints {
        let results = table.datapoint_results(&dp.name);
        let values: Vec<&str> = results.iter().map(|(_, r)| r.cleaned_value.as_str()).collect();
        let scores: Vec<f32> = results.iter().map(|(_, r)| r.confidence).collect();

        let pairs: Vec<(&str, &str)> = match truth_column {
            Some(column) => results
                .iter()
                .filter_map(|(row, r)| {
                    let truth = table.source().get(*row, column)?;
                    (!truth.is_empty()).then_some((truth, r.cleaned_value.as_str()))
                })
                .collect(),
            None => Vec::new(),
        };

        let report = DatapointReport {
            required: dp.required,
            quality: quality_metrics(&values, Some(dp.valid_values.as_slice())),
            confidence: confidence_metrics(&scores),
            accuracy: classification_metrics(&pairs),
            general_category_accuracy: scale
                .as_ref()
                .and_then(|s| general_category_metrics(s, &pairs)),
            ordinal: scale.as_ref().and_then(|s| ordinal_distance(s, &pairs)),
        };
        datapoint_metrics.insert(dp.name.clone(), report);
    }

    EvaluationReport {
        summary: ReportSummary {
            total_rows: table.source().len(),
            processed_rows: table.processed_rows(),
            datapoints_extracted: datapoints.len(),
            has_ground_truth: truth_column.is_some(),
        },
        datapoint_metrics,
    }
}

// ═══════════════════════════════════════════
// Job metrics
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointMetrics {
    pub invalid_count: usize,
    pub empty_count: usize,
    pub accuracy: Option<ClassificationMetrics>,
    pub ordinal: Option<OrdinalMetrics>,
}

/// Attached to a job when it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetrics {
    pub rows_processed: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub processing_time_secs: f64,
    pub avg_seconds_per_row: f64,
    pub datapoints: BTreeMap<String, DatapointMetrics>,
}

pub fn job_metrics(
    table: &ResultTable,
    datapoints: &[DatapointSpec],
    evaluation: &EvaluationConfig,
    error_count: usize,
    warning_count: usize,
    elapsed: Duration,
) -> JobMetrics {
    let report = evaluate(table, datapoints, evaluation);
    let rows = table.processed_rows();
    let secs = elapsed.as_secs_f64();

    JobMetrics {
        rows_processed: rows,
        error_count,
        warning_count,
        processing_time_secs: secs,
        avg_seconds_per_row: if rows == 0 { 0.0 } else { secs / rows as f64 },
        datapoints: report
            .datapoint_metrics
            .into_iter()
            .map(|(name, r)| {
                (
                    name,
                    DatapointMetrics {
                        invalid_count: r.quality.invalid_extractions,
                        empty_count: r.quality.empty_extractions,
                        accuracy: r.accuracy,
                        ordinal: r.ordinal,
                    },
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dataset::{Dataset, ExtractionResult};

    fn table() -> (ResultTable, Vec<DatapointSpec>) {
        let source = Dataset::from_rows(
            vec!["Report Text".into(), "truth".into()],
            vec![
                vec!["a".into(), "2".into()],
                vec!["b".into(), "3a".into()],
                vec!["c".into(), "".into()],
                vec!["d".into(), "1a".into()],
            ],
        )
        .unwrap();
        let dps = vec![DatapointSpec::new("btrads", "Score").with_valid_values(&[
            "0", "1a", "1b", "2", "3a", "3b", "3c", "4", "NR",
        ])];
        let mut table = ResultTable::new(source, &dps);
        table.insert(0, "btrads", ExtractionResult::new("", "2", 0.9));
        table.insert(1, "btrads", ExtractionResult::new("", "3c", 0.9));
        table.insert(2, "btrads", ExtractionResult::new("", "NR", 0.3));
        (table, dps)
    }

    fn evaluation() -> EvaluationConfig {
        EvaluationConfig {
            enabled: true,
            ground_truth_column: Some("truth".into()),
            ordinal_scale: Some("bt_rads".into()),
        }
    }

    #[test]
    fn report_without_ground_truth_has_quality_only() {
        let (table, dps) = table();
        let report = evaluate(&table, &dps, &EvaluationConfig::default());
        assert!(!report.summary.has_ground_truth);
        assert_eq!(report.summary.total_rows, 4);
        assert_eq!(report.summary.processed_rows, 3);
        let dp = &report.datapoint_metrics["btrads"];
        assert_eq!(dp.quality.total_extractions, 3);
        assert_eq!(dp.quality.empty_extractions, 1);
        assert_eq!(dp.quality.compliant_extractions, Some(3));
        assert!(dp.accuracy.is_none());
        assert!(dp.ordinal.is_none());
    }

    #[test]
    fn ground_truth_skips_empty_and_unprocessed_rows() {
        let (table, dps) = table();
        let report = evaluate(&table, &dps, &evaluation());
        let dp = &report.datapoint_metrics["btrads"];
        let acc = dp.accuracy.as_ref().unwrap();
        assert_eq!(acc.reports_evaluated, 2, "row 2 has no truth, row 3 no result");
        assert_eq!(acc.accuracy, 0.5);
        let general = dp.general_category_accuracy.as_ref().unwrap();
        assert_eq!(general.accuracy, 1.0);
        let ordinal = dp.ordinal.as_ref().unwrap();
        assert_eq!(ordinal.valid_comparisons, 2);
        assert_eq!(ordinal.max_distance, 2);
    }

    #[test]
    fn missing_truth_column_disables_accuracy() {
        let (table, dps) = table();
        let mut eval = evaluation();
        eval.ground_truth_column = Some("nope".into());
        let report = evaluate(&table, &dps, &eval);
        assert!(!report.summary.has_ground_truth);
    }

    #[test]
    fn job_metrics_averages_time() {
        let (table, dps) = table();
        let metrics = job_metrics(&table, &dps, &evaluation(), 1, 0, Duration::from_secs(6));
        assert_eq!(metrics.rows_processed, 3);
        assert_eq!(metrics.error_count, 1);
        assert!((metrics.avg_seconds_per_row - 2.0).abs() < 1e-9);
        assert_eq!(metrics.datapoints["btrads"].empty_count, 1);
        assert!(metrics.datapoints["btrads"].accuracy.is_some());
    }
}
