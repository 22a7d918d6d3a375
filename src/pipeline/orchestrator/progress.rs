use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::pipeline::jobs::{Job, JobStatus};

/// Snapshot of a job's position, sent after each row and on every
/// status change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub current_row: usize,
    pub total_rows: usize,
    pub percentage: f32,
    pub message: String,
}

impl ProgressEvent {
    pub fn from_job(job: &Job, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            current_row: job.progress.current_row,
            total_rows: job.progress.total_rows,
            percentage: job.progress.percentage,
            message: message.into(),
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::{DatapointSpec, ExtractionConfig};

    #[test]
    fn event_mirrors_job_progress() {
        let mut job = Job::new(ExtractionConfig::new(vec![DatapointSpec::new("dx", "Extract")]));
        job.start(4, 1);
        job.progress.record_row(0);
        let event = ProgressEvent::from_job(&job, "Processed row 1/4");
        assert_eq!(event.status, JobStatus::Running);
        assert_eq!(event.total_rows, 4);
        assert_eq!(event.percentage, 25.0);
        assert_eq!(event.job_id, job.id);
    }

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let job = Job::new(ExtractionConfig::new(vec![DatapointSpec::new("dx", "Extract")]));
        let (tx, mut rx) = progress_channel();
        tx.send(ProgressEvent::from_job(&job, "first")).unwrap();
        tx.send(ProgressEvent::from_job(&job, "second")).unwrap();
        assert_eq!(rx.recv().await.unwrap().message, "first");
        assert_eq!(rx.recv().await.unwrap().message, "second");
    }
}
