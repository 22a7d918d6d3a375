use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cancel::CancelFlag;
use crate::pipeline::dataset::RowResults;
use crate::pipeline::extraction::ExtractionConfig;
use crate::pipeline::metrics::JobMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_rows: usize,
    pub processed_rows: usize,
    pub current_row: usize,
    pub total_datapoints: usize,
    pub current_datapoint: usize,
    pub current_datapoint_name: Option<String>,
    pub error_count: usize,
    /// Rows that did not look like clinical text.
    pub warning_count: usize,
    pub percentage: f32,
}

impl JobProgress {
    pub fn new(total_rows: usize, total_datapoints: usize) -> Self {
        Self {
            total_rows,
            total_datapoints,
            ..Default::default()
        }
    }

    /// Mark `row` done and refresh the percentage.
    pub fn record_row(&mut self, row: usize) {
        self.current_row = row;
        self.processed_rows += 1;
        self.refresh_percentage();
    }

    pub fn refresh_percentage(&mut self) {
        self.percentage = if self.total_rows == 0 {
            100.0
        } else {
            (self.processed_rows as f32 / self.total_rows as f32 * 100.0).min(100.0)
        };
    }
}

/// One caught row or datapoint failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub row: Option<usize>,
    pub datapoint: Option<String>,
}

/// Snapshot that lets a relaunched job skip rows already done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub job_id: Uuid,
    /// Highest row index fully processed, if any.
    pub last_processed_row: Option<usize>,
    pub current_datapoint_index: usize,
    pub total_rows: usize,
    pub results: BTreeMap<usize, RowResults>,
    pub errors: Vec<ErrorRecord>,
    pub timestamp: DateTime<Utc>,
}

impl JobCheckpoint {
    /// First row a resumed run should process.
    pub fn next_row(&self) -> usize {
        self.last_processed_row.map_or(0, |r| r + 1)
    }
}

// ═══════════════════════════════════════════
// Job
// ═══════════════════════════════════════════

/// A unit of extraction work.
///
/// Status moves `queued → running → {completed | failed | cancelled}`;
/// the terminal transition happens at most once. The checkpoint is kept
/// out of the serialized job and persisted through a `CheckpointStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub config: ExtractionConfig,
    pub status: JobStatus,
    pub progress: JobProgress,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    #[serde(skip)]
    pub checkpoint: Option<JobCheckpoint>,
    #[serde(default)]
    pub metrics: Option<JobMetrics>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    cancel: CancelFlag,
}

impl Job {
    pub fn new(config: ExtractionConfig) -> Self {
        Self::with_id(Uuid::new_v4(), config)
    }

    /// A fresh job under a known id, e.g. to resume from its checkpoint.
    pub fn with_id(id: Uuid, config: ExtractionConfig) -> Self {
        Self {
            id,
            config,
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            errors: Vec::new(),
            checkpoint: None,
            metrics: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancel: CancelFlag::new(),
        }
    }

    /// Handle the caller keeps to request cancellation.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `queued → running`. Returns false from any other state.
    pub fn start(&mut self, total_rows: usize, total_datapoints: usize) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        self.progress = JobProgress::new(total_rows, total_datapoints);
        true
    }

    pub fn add_error(&mut self, message: impl Into<String>, row: Option<usize>, datapoint: Option<&str>) {
        self.errors.push(ErrorRecord {
            timestamp: Utc::now(),
            message: message.into(),
            row,
            datapoint: datapoint.map(str::to_string),
        });
        self.progress.error_count = self.errors.len();
    }

    pub fn create_checkpoint(
        &mut self,
        last_processed_row: Option<usize>,
        current_datapoint_index: usize,
        results: BTreeMap<usize, RowResults>,
    ) -> &JobCheckpoint {
        self.checkpoint.insert(JobCheckpoint {
            job_id: self.id,
            last_processed_row,
            current_datapoint_index,
            total_rows: self.progress.total_rows,
            results,
            errors: self.errors.clone(),
            timestamp: Utc::now(),
        })
    }

    fn finish(&mut self, status: JobStatus) -> bool {
        if self.is_complete() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn complete(&mut self, metrics: Option<JobMetrics>) -> bool {
        let changed = self.finish(JobStatus::Completed);
        if changed {
            self.metrics = metrics;
        }
        changed
    }

    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        let changed = self.finish(JobStatus::Failed);
        if changed {
            self.error_message = Some(message.into());
        }
        changed
    }

    pub fn cancel(&mut self) -> bool {
        self.finish(JobStatus::Cancelled)
    }

    /// Time since start, up to completion if finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.completed_at.unwrap_or_else(Utc::now) - started)
    }

    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }
}
