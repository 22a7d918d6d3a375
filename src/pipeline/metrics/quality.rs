use serde::{Deserialize, Serialize};

use crate::pipeline::extraction::{is_vacuous, INVALID_VALUE};

const CONFIDENCE_BIN_EDGES: [f64; 6] = [0.0, 0.2, 0.4, 0.6, 0.8, 1.0];

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Valid / invalid / empty breakdown of cleaned values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub total_extractions: usize,
    pub valid_extractions: usize,
    pub invalid_extractions: usize,
    /// "NR", "unknown" or empty.
    pub empty_extractions: usize,
    pub valid_percentage: f64,
    pub invalid_percentage: f64,
    pub empty_percentage: f64,
    /// Values inside the configured valid-value set, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliant_extractions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_percentage: Option<f64>,
}

pub fn quality_metrics(values: &[&str], valid_values: Option<&[String]>) -> QualityMetrics {
    let total = values.len();
    let invalid = values.iter().filter(|v| **v == INVALID_VALUE).count();
    let empty = values.iter().filter(|v| is_vacuous(v)).count();
    let valid = total - invalid - empty;

    let compliant = valid_values
        .filter(|allowed| !allowed.is_empty())
        .map(|allowed| values.iter().filter(|v| allowed.iter().any(|a| a == **v)).count());

    QualityMetrics {
        total_extractions: total,
        valid_extractions: valid,
        invalid_extractions: invalid,
        empty_extractions: empty,
        valid_percentage: percentage(valid, total),
        invalid_percentage: percentage(invalid, total),
        empty_percentage: percentage(empty, total),
        compliant_extractions: compliant,
        compliance_percentage: compliant.map(|c| percentage(c, total)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBin {
    /// e.g. `"0.8-1.0"`.
    pub range: String,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceMetrics {
    pub mean_confidence: f64,
    pub median_confidence: f64,
    /// Sample standard deviation; 0 for a single score.
    pub std_confidence: f64,
    pub min_confidence: f64,
    pub max_confidence: f64,
    pub confidence_distribution: Vec<ConfidenceBin>,
}

fn bin_index(score: f64) -> Option<usize> {
    let last = CONFIDENCE_BIN_EDGES.len() - 2;
    if score == CONFIDENCE_BIN_EDGES[last + 1] {
        return Some(last);
    }
    (0..=last).find(|&i| score >= CONFIDENCE_BIN_EDGES[i] && score < CONFIDENCE_BIN_EDGES[i + 1])
}

/// Summary statistics and a five-bucket histogram over [0, 1].
/// Scores outside [0, 1] are left out of the histogram only.
pub fn confidence_metrics(scores: &[f32]) -> Option<ConfidenceMetrics> {
    let mut sorted: Vec<f64> = scores
        .iter()
        .map(|&s| s as f64)
        .filter(|s| !s.is_nan())
        .collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    let std = if n < 2 {
        0.0
    } else {
        (sorted.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    };

    let mut counts = [0usize; 5];
    for &s in &sorted {
        if let Some(i) = bin_index(s) {
            counts[i] += 1;
        }
    }
    let distribution = counts
        .iter()
        .enumerate()
        .map(|(i, &count)| ConfidenceBin {
            range: format!(
                "{:.1}-{:.1}",
                CONFIDENCE_BIN_EDGES[i],
                CONFIDENCE_BIN_EDGES[i + 1]
            ),
            count,
            percentage: percentage(count, n),
        })
        .collect();

    Some(ConfidenceMetrics {
        mean_confidence: mean,
        median_confidence: median,
        std_confidence: std,
        min_confidence: sorted[0],
        max_confidence: sorted[n - 1],
        confidence_distribution: distribution,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_breakdown() {
        let values = ["benign", "invalid", "NR", "", "cancer", "unknown"];
        let q = quality_metrics(&values, None);
        assert_eq!(q.total_extractions, 6);
        assert_eq!(q.valid_extractions, 2);
        assert_eq!(q.invalid_extractions, 1);
        assert_eq!(q.empty_extractions, 3);
        assert!((q.empty_percentage - 50.0).abs() < 1e-9);
        assert!(q.compliant_extractions.is_none());
    }

    #[test]
    fn compliance_counts_allow_listed_values() {
        let allowed = vec!["benign".to_string(), "cancer".to_string(), "NR".to_string()];
        let values = ["benign", "invalid", "NR", "glioma"];
        let q = quality_metrics(&values, Some(&allowed));
        assert_eq!(q.compliant_extractions, Some(2));
        assert_eq!(q.compliance_percentage, Some(50.0));
    }

    #[test]
    fn empty_quality_is_all_zero() {
        let q = quality_metrics(&[], None);
        assert_eq!(q.total_extractions, 0);
        assert_eq!(q.valid_percentage, 0.0);
    }

    #[test]
    fn confidence_histogram_has_five_buckets() {
        let m = confidence_metrics(&[0.0, 0.3, 0.7, 0.9, 0.9, 1.0]).unwrap();
        let counts: Vec<usize> = m.confidence_distribution.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 0, 1, 3], "1.0 falls in the last bucket");
        assert_eq!(m.confidence_distribution[0].range, "0.0-0.2");
        assert_eq!(m.confidence_distribution[4].range, "0.8-1.0");
        assert_eq!(m.min_confidence, 0.0);
        assert_eq!(m.max_confidence, 1.0);
    }

    #[test]
    fn confidence_summary_stats() {
        let m = confidence_metrics(&[0.5, 0.5]).unwrap();
        assert!((m.mean_confidence - 0.5).abs() < 1e-9);
        assert_eq!(m.std_confidence, 0.0);
        assert!(confidence_metrics(&[]).is_none());
    }
}
