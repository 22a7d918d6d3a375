use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Counts of (true label, predicted label) pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Sorted union of observed true and predicted labels.
    pub labels: Vec<String>,
    /// `matrix[t][p]`: samples with true label `labels[t]` predicted as `labels[p]`.
    pub matrix: Vec<Vec<usize>>,
    pub total_samples: usize,
}

impl ConfusionMatrix {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let labels: Vec<String> = pairs
            .iter()
            .flat_map(|(t, p)| [*t, *p])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();
        let index: BTreeMap<&str, usize> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();

        let mut matrix = vec![vec![0; labels.len()]; labels.len()];
        for (t, p) in pairs {
            if let (Some(&ti), Some(&pi)) = (index.get(t), index.get(p)) {
                matrix[ti][pi] += 1;
            }
        }

        Self {
            labels,
            matrix,
            total_samples: pairs.len(),
        }
    }

    fn true_positives(&self, i: usize) -> usize {
        self.matrix[i][i]
    }

    /// Samples predicted as label `i`.
    fn predicted(&self, i: usize) -> usize {
        self.matrix.iter().map(|row| row[i]).sum()
    }

    /// Samples whose true label is `i`.
    fn actual(&self, i: usize) -> usize {
        self.matrix[i].iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Agreement between extracted values and ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub micro_precision: f64,
    pub micro_recall: f64,
    pub micro_f1: f64,
    pub reports_evaluated: usize,
    pub per_label: BTreeMap<String, LabelMetrics>,
    pub confusion_matrix: ConfusionMatrix,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Exact-match metrics over `(truth, predicted)` pairs.
///
/// Labels are compared as-is. Undefined ratios count as 0. Macro averages
/// run over every label seen on either side. Returns `None` for no pairs.
pub fn classification_metrics(pairs: &[(&str, &str)]) -> Option<ClassificationMetrics> {
    if pairs.is_empty() {
        return None;
    }

    let confusion = ConfusionMatrix::from_pairs(pairs);
    let n_labels = confusion.labels.len();

    let mut per_label = BTreeMap::new();
    let (mut sum_p, mut sum_r, mut sum_f) = (0.0, 0.0, 0.0);
    for (i, label) in confusion.labels.iter().enumerate() {
        let tp = confusion.true_positives(i);
        let precision = ratio(tp, confusion.predicted(i));
        let recall = ratio(tp, confusion.actual(i));
        let f = f1(precision, recall);
        sum_p += precision;
        sum_r += recall;
        sum_f += f;
        per_label.insert(
            label.clone(),
            LabelMetrics {
                precision,
                recall,
                f1: f,
                support: confusion.actual(i),
            },
        );
    }

    let correct = pairs.iter().filter(|(t, p)| t == p).count();
    let accuracy = ratio(correct, pairs.len());
    let n = n_labels as f64;

    // Single-label: micro precision, recall and F1 all equal accuracy.
    Some(ClassificationMetrics {
        accuracy,
        macro_precision: sum_p / n,
        macro_recall: sum_r / n,
        macro_f1: sum_f / n,
        micro_precision: accuracy,
        micro_recall: accuracy,
        micro_f1: accuracy,
        reports_evaluated: pairs.len(),
        per_label,
        confusion_matrix: confusion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_input_has_no_metrics() {
        assert!(classification_metrics(&[]).is_none());
    }

    #[test]
    fn perfect_agreement() {
        let pairs = [("benign", "benign"), ("cancer", "cancer")];
        let m = classification_metrics(&pairs).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.macro_f1, 1.0);
        assert_eq!(m.reports_evaluated, 2);
    }

    #[test]
    fn macro_averages_over_all_labels() {
        // truth:     a a b b
        // predicted: a b b c
        let pairs = [("a", "a"), ("a", "b"), ("b", "b"), ("b", "c")];
        let m = classification_metrics(&pairs).unwrap();
        assert!(close(m.accuracy, 0.5));
        // precision: a=1, b=0.5, c=0 -> 0.5
        assert!(close(m.macro_precision, 0.5), "got {}", m.macro_precision);
        // recall: a=0.5, b=0.5, c=0 -> 1/3
        assert!(close(m.macro_recall, 1.0 / 3.0), "got {}", m.macro_recall);
        assert!(close(m.micro_f1, 0.5));
        assert_eq!(m.per_label["c"].support, 0);
    }

    #[test]
    fn confusion_matrix_rows_are_truth() {
        let pairs = [("benign", "cancer"), ("benign", "benign"), ("cancer", "cancer")];
        let cm = ConfusionMatrix::from_pairs(&pairs);
        assert_eq!(cm.labels, vec!["benign", "cancer"]);
        assert_eq!(cm.matrix, vec![vec![1, 1], vec![0, 1]]);
        assert_eq!(cm.total_samples, 3);
    }

    #[test]
    fn comparison_is_exact() {
        let m = classification_metrics(&[("Benign", "benign")]).unwrap();
        assert_eq!(m.accuracy, 0.0);
    }
}
