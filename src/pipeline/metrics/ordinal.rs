use serde::{Deserialize, Serialize};

use super::classification::{classification_metrics, ClassificationMetrics};

pub const BT_RADS: &str = "bt_rads";

/// Labels with a severity rank and an optional coarser category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalScale {
    pub name: String,
    /// `(label, severity rank)`.
    pub ranks: Vec<(String, u32)>,
    /// `(label, general category)`.
    pub categories: Vec<(String, String)>,
}

impl OrdinalScale {
    /// Brain Tumor RADS: 0, 1a, 1b, 2, 3a, 3b, 3c, 4.
    pub fn bt_rads() -> Self {
        let labels = ["0", "1a", "1b", "2", "3a", "3b", "3c", "4"];
        Self {
            name: BT_RADS.to_string(),
            ranks: labels
                .iter()
                .enumerate()
                .map(|(rank, l)| (l.to_string(), rank as u32))
                .collect(),
            categories: labels
                .iter()
                .map(|l| (l.to_string(), l[..1].to_string()))
                .collect(),
        }
    }

    /// Built-in scale by name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_lowercase().replace('-', "_").as_str() {
            BT_RADS | "btrads" => Some(Self::bt_rads()),
            _ => None,
        }
    }

    pub fn rank(&self, label: &str) -> Option<u32> {
        let label = label.trim();
        self.ranks.iter().find(|(l, _)| l == label).map(|(_, r)| *r)
    }

    pub fn category(&self, label: &str) -> Option<&str> {
        let label = label.trim();
        self.categories
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, c)| c.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalMetrics {
    pub valid_comparisons: usize,
    pub mean_distance: f64,
    pub median_distance: f64,
    pub min_distance: u32,
    pub max_distance: u32,
    /// `distance_distribution[d]`: comparisons at distance `d`.
    pub distance_distribution: Vec<usize>,
}

/// Severity distance over `(truth, predicted)` pairs.
///
/// Pairs where either label is off the scale are skipped rather than
/// counted as maximal misses. `None` when nothing is comparable.
pub fn ordinal_distance(scale: &OrdinalScale, pairs: &[(&str, &str)]) -> Option<OrdinalMetrics> {
    let mut distances: Vec<u32> = pairs
        .iter()
        .filter_map(|(t, p)| Some(scale.rank(t)?.abs_diff(scale.rank(p)?)))
        .collect();
    if distances.is_empty() {
        return None;
    }
    distances.sort_unstable();

    let n = distances.len();
    let mean = distances.iter().map(|&d| d as f64).sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        distances[n / 2] as f64
    } else {
        (distances[n / 2 - 1] + distances[n / 2]) as f64 / 2.0
    };
    let max = distances[n - 1];

    let mut distribution = vec![0; max as usize + 1];
    for &d in &distances {
        distribution[d as usize] += 1;
    }

    Some(OrdinalMetrics {
        valid_comparisons: n,
        mean_distance: mean,
        median_distance: median,
        min_distance: distances[0],
        max_distance: max,
        distance_distribution: distribution,
    })
}

/// Accuracy after collapsing labels to their general category.
/// Labels without a category are dropped.
pub fn general_category_metrics(
    scale: &OrdinalScale,
    pairs: &[(&str, &str)],
) -> Option<ClassificationMetrics> {
    let mapped: Vec<(&str, &str)> = pairs
        .iter()
        .filter_map(|(t, p)| Some((scale.category(t)?, scale.category(p)?)))
        .collect();
    classification_metrics(&mapped)
}
