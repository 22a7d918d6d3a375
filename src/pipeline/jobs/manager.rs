use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::cancel::CancelFlag;
use super::store::JobStore;
use super::types::{Job, JobStatus};
use super::StoreError;
use crate::pipeline::dataset::{Dataset, ResultTable};
use crate::pipeline::extraction::{ExtractionConfig, ExtractionError};
use crate::pipeline::orchestrator::ExtractionOrchestrator;

/// Jobs allowed to run at once when the caller does not say.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;

type JobOutcome = Result<ResultTable, ExtractionError>;

struct ActiveJob {
    cancel: CancelFlag,
    handle: Option<JoinHandle<JobOutcome>>,
}

/// Runs jobs as background tasks, at most `max_concurrent` at a time.
///
/// Job metadata goes through the injected [`JobStore`]: once on submit,
/// again when the job starts running and when it reaches a terminal state.
/// Row-level progress is available from the orchestrator's progress channel.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    orchestrator: Arc<ExtractionOrchestrator>,
    permits: Arc<Semaphore>,
    active: Mutex<HashMap<Uuid, ActiveJob>>,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        orchestrator: Arc<ExtractionOrchestrator>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            orchestrator,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate `config` against `dataset`, create a job and schedule it.
    pub fn submit(&self, config: ExtractionConfig, dataset: Dataset) -> Result<Uuid, ExtractionError> {
        config.validate()?;
        if !dataset.has_column(&config.text_column) {
            return Err(ExtractionError::MissingTextColumn(config.text_column));
        }
        self.submit_job(Job::new(config), dataset)
    }

    /// Schedule an existing queued job, e.g. one rebuilt under a known id
    /// so that it resumes from its checkpoint.
    pub fn submit_job(&self, job: Job, dataset: Dataset) -> Result<Uuid, ExtractionError> {
        if job.status != JobStatus::Queued {
            return Err(ExtractionError::InvalidConfig(format!(
                "job {} is {}, only queued jobs can be submitted",
                job.id, job.status
            )));
        }
        self.store.set(&job)?;

        let id = job.id;
        let cancel = job.cancel_flag();
        let handle = tokio::spawn(run_job(
            job,
            dataset,
            Arc::clone(&self.store),
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.permits),
        ));

        let mut active = self.active.lock().map_err(|_| StoreError::LockPoisoned)?;
        active.insert(
            id,
            ActiveJob {
                cancel,
                handle: Some(handle),
            },
        );
        tracing::info!(job_id = %id, "Job submitted");
        Ok(id)
    }

    /// Request cancellation. Returns false for unknown or already
    /// collected jobs.
    pub fn cancel(&self, id: &Uuid) -> bool {
        let Ok(active) = self.active.lock() else {
            return false;
        };
        match active.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(job_id = %id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Current stored state. Reporting a terminal state collects the job's
    /// finished task, after which [`JobManager::wait`] has nothing to return.
    pub fn status(&self, id: &Uuid) -> Result<Option<Job>, StoreError> {
        let job = self.store.get(id)?;
        if job.as_ref().is_some_and(Job::is_complete) {
            self.reap(|entry_id| entry_id == id)?;
        }
        Ok(job)
    }

    /// All stored jobs, oldest first. Collects every finished task.
    pub fn list(&self) -> Result<Vec<Job>, StoreError> {
        self.reap(|_| true)?;
        let mut jobs = Vec::new();
        for id in self.store.list()? {
            if let Some(job) = self.store.get(&id)? {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Drop active entries selected by `which` whose task has exited.
    fn reap(&self, which: impl Fn(&Uuid) -> bool) -> Result<(), StoreError> {
        let mut active = self.active.lock().map_err(|_| StoreError::LockPoisoned)?;
        active.retain(|id, entry| {
            let finished = entry.handle.as_ref().map_or(true, JoinHandle::is_finished);
            let collect = which(id) && finished;
            if collect {
                tracing::debug!(job_id = %id, "Collected finished job task");
            }
            !collect
        });
        Ok(())
    }

    /// Wait for a submitted job's task and return its outcome. Each job
    /// can be waited on once, and only until its finished task has been
    /// collected by `status` or `list`.
    pub async fn wait(&self, id: &Uuid) -> JobOutcome {
        let handle = {
            let mut active = self.active.lock().map_err(|_| StoreError::LockPoisoned)?;
            active
                .get_mut(id)
                .and_then(|entry| entry.handle.take())
                .ok_or_else(|| ExtractionError::InvalidConfig(format!("job {id} has no task to wait on")))?
        };

        let outcome = handle
            .await
            .map_err(|e| ExtractionError::TaskFailed(e.to_string()))?;

        if let Ok(mut active) = self.active.lock() {
            active.remove(id);
        }
        outcome
    }

    /// Forget a finished job along with its checkpoint. Refuses jobs that
    /// are queued or running.
    pub fn remove(&self, id: &Uuid) -> Result<bool, ExtractionError> {
        let Some(job) = self.store.get(id)? else {
            return Ok(false);
        };
        if !job.is_complete() {
            return Err(ExtractionError::InvalidConfig(format!(
                "job {id} is {}, cancel it before removing",
                job.status
            )));
        }

        if let Ok(mut active) = self.active.lock() {
            active.remove(id);
        }
        self.orchestrator.checkpoints().delete(id)?;
        Ok(self.store.delete(id)?)
    }
}

async fn run_job(
    mut job: Job,
    dataset: Dataset,
    store: Arc<dyn JobStore>,
    orchestrator: Arc<ExtractionOrchestrator>,
    permits: Arc<Semaphore>,
) -> JobOutcome {
    let _permit = permits
        .acquire_owned()
        .await
        .map_err(|e| ExtractionError::TaskFailed(e.to_string()))?;

    if job.cancel_requested() {
        job.cancel();
        store.set(&job)?;
        tracing::info!(job_id = %job.id, "Job cancelled before it started");
        return Ok(ResultTable::new(dataset, &job.config.datapoints));
    }

    let mut snapshot = job.clone();
    snapshot.start(
        job.config.processing.row_budget(dataset.len()),
        job.config.datapoints.len(),
    );
    store.set(&snapshot)?;

    let outcome = orchestrator.run(&mut job, &dataset).await;
    if let Err(e) = store.set(&job) {
        tracing::error!(job_id = %job.id, error = %e, "Failed to persist finished job");
    }
    outcome
}
