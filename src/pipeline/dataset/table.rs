use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::DatasetError;
use crate::pipeline::extraction::DatapointSpec;

// ═══════════════════════════════════════════
// Source dataset
// ═══════════════════════════════════════════

/// A rectangular table of string cells with named columns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>) -> Result<Self, DatasetError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(DatasetError::DuplicateColumn(column.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, DatasetError> {
        let mut dataset = Self::new(columns)?;
        for row in rows {
            dataset.push_row(row)?;
        }
        Ok(dataset)
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), DatasetError> {
        if row.len() != self.columns.len() {
            return Err(DatasetError::RowLength {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx)).map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Result<Vec<&str>, DatasetError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| DatasetError::UnknownColumn(name.to_string()))?;
        Ok(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }
}

// ═══════════════════════════════════════════
// Extraction results
// ═══════════════════════════════════════════

/// Outcome for one datapoint of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Full model reply, after sanitizing.
    pub raw_response: String,
    /// Validated value, the datapoint default, or `"invalid"`.
    pub cleaned_value: String,
    pub confidence: f32,
}

impl ExtractionResult {
    pub fn new(raw_response: impl Into<String>, cleaned_value: impl Into<String>, confidence: f32) -> Self {
        Self {
            raw_response: raw_response.into(),
            cleaned_value: cleaned_value.into(),
            confidence,
        }
    }
}

/// Results of one row, keyed by datapoint name.
pub type RowResults = BTreeMap<String, ExtractionResult>;

/// The source dataset plus accumulated per-row results.
///
/// Results are kept sparse; [`ResultTable::to_dataset`] renders the
/// `<name>_raw`, `<name>_cleaned` and `<name>_confidence` columns, leaving
/// cells of unprocessed rows empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    source: Dataset,
    datapoints: Vec<String>,
    results: BTreeMap<usize, RowResults>,
}

impl ResultTable {
    pub fn new(source: Dataset, datapoints: &[DatapointSpec]) -> Self {
        Self::with_results(source, datapoints, BTreeMap::new())
    }

    pub fn with_results(
        source: Dataset,
        datapoints: &[DatapointSpec],
        results: BTreeMap<usize, RowResults>,
    ) -> Self {
        Self {
            source,
            datapoints: datapoints.iter().map(|dp| dp.name.clone()).collect(),
            results,
        }
    }

    pub fn source(&self) -> &Dataset {
        &self.source
    }

    pub fn datapoints(&self) -> &[String] {
        &self.datapoints
    }

    pub fn insert(&mut self, row: usize, datapoint: &str, result: ExtractionResult) {
        self.results
            .entry(row)
            .or_default()
            .insert(datapoint.to_string(), result);
    }

    pub fn result(&self, row: usize, datapoint: &str) -> Option<&ExtractionResult> {
        self.results.get(&row).and_then(|r| r.get(datapoint))
    }

    pub fn row(&self, row: usize) -> Option<&RowResults> {
        self.results.get(&row)
    }

    pub fn results(&self) -> &BTreeMap<usize, RowResults> {
        &self.results
    }

    /// Rows with at least one datapoint result.
    pub fn processed_rows(&self) -> usize {
        self.results.len()
    }

    /// `(row, result)` pairs for one datapoint, in row order.
    pub fn datapoint_results(&self, datapoint: &str) -> Vec<(usize, &ExtractionResult)> {
        self.results
            .iter()
            .filter_map(|(row, r)| r.get(datapoint).map(|res| (*row, res)))
            .collect()
    }

    /// Source columns followed by three result columns per datapoint.
    pub fn to_dataset(&self) -> Dataset {
        let mut columns = self.source.columns.clone();
        for name in &self.datapoints {
            columns.push(format!("{name}_raw"));
            columns.push(format!("{name}_cleaned"));
            columns.push(format!("{name}_confidence"));
        }

        let rows = self
            .source
            .rows
            .iter()
            .enumerate()
            .map(|(idx, source_row)| {
                let mut row = source_row.clone();
                let results = self.results.get(&idx);
                for name in &self.datapoints {
                    match results.and_then(|r| r.get(name)) {
                        Some(res) => {
                            row.push(res.raw_response.clone());
                            row.push(res.cleaned_value.clone());
                            row.push(res.confidence.to_string());
                        }
                        None => row.extend([String::new(), String::new(), String::new()]),
                    }
                }
                row
            })
            .collect();

        Dataset { columns, rows }
    }
}
