use std::sync::Arc;
use std::time::Instant;

use super::progress::{ProgressEvent, ProgressSender};
use crate::pipeline::dataset::{Dataset, ExtractionResult, ResultTable};
use crate::pipeline::extraction::{
    build_datapoint_messages, build_datapoint_query, build_single_call_messages, parse_datapoint,
    parse_single_call, CompiledDatapoint, ExtractionConfig, ExtractionError, ExtractionStrategy,
    OutputMode,
};
use crate::pipeline::jobs::{CheckpointStore, Job, JobStatus};
use crate::pipeline::llm::{GenerationError, ModelBackend, ModelInvoker, OutputFormat};
use crate::pipeline::metrics::job_metrics;
use crate::pipeline::preprocess::{normalize_text, screen_clinical_text};
use crate::pipeline::rag::{ContextRetriever, LocalModelProvider, ModelCache};

enum Flow {
    Continue,
    Cancelled,
}

/// State of one `run` call.
struct Run {
    config: ExtractionConfig,
    datapoints: Vec<CompiledDatapoint>,
    invoker: ModelInvoker,
    text_index: usize,
    table: ResultTable,
}

/// Drives an extraction job over a dataset.
///
/// One cooperative task per job: rows are processed in order and, in
/// multi-call mode, datapoints in configured order. Between rows a single
/// boundary step writes a due checkpoint, yields, and polls cancellation.
pub struct ExtractionOrchestrator {
    backend: Arc<dyn ModelBackend>,
    retriever: Arc<ContextRetriever>,
    checkpoints: Arc<dyn CheckpointStore>,
    progress: Option<ProgressSender>,
}

impl ExtractionOrchestrator {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        retriever: Arc<ContextRetriever>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            backend,
            retriever,
            checkpoints,
            progress: None,
        }
    }

    /// Retrieval backed by models under the application models directory.
    pub fn with_local_models(
        backend: Arc<dyn ModelBackend>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let cache = ModelCache::new(Arc::new(LocalModelProvider::default()));
        Self::new(backend, Arc::new(ContextRetriever::new(Arc::new(cache))), checkpoints)
    }

    pub fn with_progress(mut self, sender: ProgressSender) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn retriever(&self) -> &Arc<ContextRetriever> {
        &self.retriever
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    fn emit(&self, job: &Job, message: impl Into<String>) {
        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(ProgressEvent::from_job(job, message));
        }
    }

    /// Run `job` to a terminal state.
    ///
    /// Returns the result table when the job completes or is cancelled
    /// (keeping rows already done). Configuration problems and escalated
    /// row failures mark the job failed and are returned as errors.
    pub async fn run(&self, job: &mut Job, dataset: &Dataset) -> Result<ResultTable, ExtractionError> {
        if job.status != JobStatus::Queued {
            return Err(ExtractionError::InvalidConfig(format!(
                "job {} is {}, only queued jobs can run",
                job.id, job.status
            )));
        }

        let started = Instant::now();
        let mut run = match self.prepare(job, dataset).await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Job rejected before processing");
                job.fail(e.to_string());
                self.emit(job, e.to_string());
                return Err(e);
            }
        };

        let total = run.config.processing.row_budget(dataset.len());
        job.start(total, run.datapoints.len());
        let start_row = self.resume(job, &mut run, total);

        tracing::info!(
            job_id = %job.id,
            rows = total,
            start_row,
            datapoints = run.datapoints.len(),
            strategy = %run.config.strategy,
            "Extraction job started"
        );
        if run.config.strategy == ExtractionStrategy::Workflow {
            tracing::warn!(
                job_id = %job.id,
                "Workflow strategy is not implemented, running datapoints as multi_call"
            );
        }
        self.emit(job, "Started");

        let mut last_done = start_row.checked_sub(1);
        let mut since_checkpoint = 0;
        for row in start_row..total {
            if let Flow::Cancelled = self
                .row_boundary(job, &run, last_done, &mut since_checkpoint)
                .await
            {
                return Ok(self.finish_cancelled(job, run, last_done));
            }

            match self.process_row(job, &mut run, row).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Cancelled) => return Ok(self.finish_cancelled(job, run, last_done)),
                Err(e) => return Err(self.finish_failed(job, &run, last_done, e)),
            }

            last_done = Some(row);
            since_checkpoint += 1;
            job.progress.record_row(row);
            self.emit(job, format!("Processed row {}/{}", row + 1, total));
        }

        Ok(self.finish_completed(job, run, last_done, started))
    }

    /// Eager checks that need no row processing.
    async fn prepare(&self, job: &Job, dataset: &Dataset) -> Result<Run, ExtractionError> {
        let config = job.config.clone();
        config.validate()?;

        let text_index = dataset
            .column_index(&config.text_column)
            .ok_or_else(|| ExtractionError::MissingTextColumn(config.text_column.clone()))?;
        let datapoints = CompiledDatapoint::compile_all(&config.datapoints)?;

        let invoker = ModelInvoker::new(Arc::clone(&self.backend), config.model.clone());
        invoker.ensure_model().await?;

        let table = ResultTable::new(dataset.clone(), &config.datapoints);
        Ok(Run {
            config,
            datapoints,
            invoker,
            text_index,
            table,
        })
    }

    /// Restore results and errors from a saved checkpoint, returning the
    /// first row still to process.
    fn resume(&self, job: &mut Job, run: &mut Run, total: usize) -> usize {
        if !run.config.processing.use_checkpoints {
            return 0;
        }
        let checkpoint = match self.checkpoints.load(&job.id) {
            Ok(Some(cp)) => cp,
            Ok(None) => return 0,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Checkpoint unreadable, starting from first row");
                return 0;
            }
        };

        let start_row = checkpoint.next_row();
        run.table = ResultTable::with_results(
            run.table.source().clone(),
            &run.config.datapoints,
            checkpoint.results.clone(),
        );
        job.errors = checkpoint.errors.clone();
        job.progress.error_count = job.errors.len();
        job.progress.processed_rows = start_row.min(total);
        job.progress.refresh_percentage();
        tracing::info!(
            job_id = %job.id,
            start_row,
            restored_rows = checkpoint.results.len(),
            "Resuming from checkpoint"
        );
        job.checkpoint = Some(checkpoint);
        start_row
    }

    /// Between rows: write a due checkpoint, yield, then poll cancellation.
    async fn row_boundary(
        &self,
        job: &mut Job,
        run: &Run,
        last_done: Option<usize>,
        since_checkpoint: &mut usize,
    ) -> Flow {
        if *since_checkpoint >= run.config.processing.save_frequency {
            self.save_checkpoint(job, run, last_done);
            *since_checkpoint = 0;
        }
        tokio::task::yield_now().await;
        if job.cancel_requested() {
            Flow::Cancelled
        } else {
            Flow::Continue
        }
    }

    async fn process_row(&self, job: &mut Job, run: &mut Run, row: usize) -> Result<Flow, ExtractionError> {
        let text = normalize_text(
            run.table
                .source()
                .rows()
                .get(row)
                .and_then(|r| r.get(run.text_index))
                .map(String::as_str)
                .unwrap_or_default(),
        );
        if text.is_empty() {
            tracing::debug!(job_id = %job.id, row, "Skipping row with blank text");
            return Ok(Flow::Continue);
        }

        let screen = screen_clinical_text(&text);
        if !screen.is_clinical {
            job.progress.warning_count += 1;
            tracing::debug!(
                job_id = %job.id,
                row,
                indicators = screen.indicator_count,
                "Row does not look like clinical text"
            );
        }

        match run.config.strategy {
            ExtractionStrategy::SingleCall => self.single_call_row(job, run, row, &text).await,
            ExtractionStrategy::MultiCall | ExtractionStrategy::Workflow => {
                self.multi_call_row(job, run, row, &text).await
            }
        }
    }

    async fn single_call_row(
        &self,
        job: &mut Job,
        run: &mut Run,
        row: usize,
        text: &str,
    ) -> Result<Flow, ExtractionError> {
        let query = run
            .config
            .datapoints
            .iter()
            .map(build_datapoint_query)
            .collect::<Vec<_>>()
            .join(" ");
        let context = self
            .retriever
            .retrieve_context(text, &query, &run.config.retrieval);
        let messages = build_single_call_messages(&context.text, &run.config.datapoints);

        let raw = match run.invoker.generate(&messages, Some(OutputFormat::Json)).await {
            Ok(raw) => raw,
            Err(e) => {
                record_failure(job, &run.config, row, None, e)?;
                return Ok(Flow::Continue);
            }
        };

        let values = parse_single_call(&raw, &run.datapoints);
        for (dp, value) in run.datapoints.iter().zip(values) {
            let confidence = dp.confidence(&value);
            run.table
                .insert(row, &dp.spec.name, ExtractionResult::new(raw.clone(), value, confidence));
        }
        tracing::debug!(job_id = %job.id, row, "Row extracted");
        Ok(Flow::Continue)
    }

    async fn multi_call_row(
        &self,
        job: &mut Job,
        run: &mut Run,
        row: usize,
        text: &str,
    ) -> Result<Flow, ExtractionError> {
        // Without retrieval every datapoint sees the same truncated document.
        let shared_context = (!run.config.retrieval.enabled).then(|| {
            self.retriever
                .retrieve_context(text, "", &run.config.retrieval)
                .text
        });

        for idx in 0..run.datapoints.len() {
            if idx > 0 && job.cancel_requested() {
                return Ok(Flow::Cancelled);
            }

            let dp = &run.datapoints[idx];
            job.progress.current_datapoint = idx;
            job.progress.current_datapoint_name = Some(dp.spec.name.clone());

            let retrieved;
            let context = match &shared_context {
                Some(context) => context.as_str(),
                None => {
                    retrieved = self.retriever.retrieve_context(
                        text,
                        &build_datapoint_query(&dp.spec),
                        &run.config.retrieval,
                    );
                    retrieved.text.as_str()
                }
            };

            let messages = build_datapoint_messages(context, &dp.spec);
            let format = match dp.spec.output_mode {
                OutputMode::Json => OutputFormat::Json,
                OutputMode::Text => OutputFormat::Text,
            };

            match run.invoker.generate(&messages, Some(format)).await {
                Ok(raw) => {
                    let value = parse_datapoint(&raw, dp);
                    let confidence = dp.confidence(&value);
                    run.table
                        .insert(row, &dp.spec.name, ExtractionResult::new(raw, value, confidence));
                }
                Err(e) => record_failure(job, &run.config, row, Some(&dp.spec.name), e)?,
            }
        }
        Ok(Flow::Continue)
    }

    fn save_checkpoint(&self, job: &mut Job, run: &Run, last_done: Option<usize>) {
        if !run.config.processing.use_checkpoints {
            return;
        }
        let datapoint_index = job.progress.current_datapoint;
        let checkpoint = job.create_checkpoint(last_done, datapoint_index, run.table.results().clone());
        if let Err(e) = self.checkpoints.save(checkpoint) {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to save checkpoint");
        }
    }

    fn finish_cancelled(&self, job: &mut Job, run: Run, last_done: Option<usize>) -> ResultTable {
        self.save_checkpoint(job, &run, last_done);
        job.cancel();
        tracing::info!(
            job_id = %job.id,
            last_row = ?last_done,
            "Extraction job cancelled"
        );
        self.emit(job, "Cancelled");
        run.table
    }

    fn finish_failed(
        &self,
        job: &mut Job,
        run: &Run,
        last_done: Option<usize>,
        error: ExtractionError,
    ) -> ExtractionError {
        self.save_checkpoint(job, run, last_done);
        job.fail(error.to_string());
        tracing::error!(
            job_id = %job.id,
            errors = job.errors.len(),
            error = %error,
            "Extraction job failed"
        );
        self.emit(job, error.to_string());
        error
    }

    fn finish_completed(
        &self,
        job: &mut Job,
        run: Run,
        last_done: Option<usize>,
        started: Instant,
    ) -> ResultTable {
        let processing = &run.config.processing;
        self.save_checkpoint(job, &run, last_done);
        if processing.use_checkpoints && processing.cleanup_checkpoint_on_completion {
            if let Err(e) = self.checkpoints.delete(&job.id) {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to remove checkpoint");
            }
        }

        let metrics = job_metrics(
            &run.table,
            &run.config.datapoints,
            &run.config.evaluation,
            job.errors.len(),
            job.progress.warning_count,
            started.elapsed(),
        );
        tracing::info!(
            job_id = %job.id,
            rows = metrics.rows_processed,
            errors = metrics.error_count,
            warnings = metrics.warning_count,
            secs = metrics.processing_time_secs,
            "Extraction job completed"
        );
        job.complete(Some(metrics));
        self.emit(job, "Completed");
        run.table
    }
}

/// Record a caught failure and apply the error-tolerance policy.
fn record_failure(
    job: &mut Job,
    config: &ExtractionConfig,
    row: usize,
    datapoint: Option<&str>,
    error: GenerationError,
) -> Result<(), ExtractionError> {
    let message = error.to_string();
    job.add_error(message.clone(), Some(row), datapoint);
    tracing::warn!(
        job_id = %job.id,
        row,
        datapoint = datapoint.unwrap_or("-"),
        errors = job.errors.len(),
        error = %message,
        "Extraction failed for row"
    );

    let processing = &config.processing;
    if !processing.skip_errors {
        return Err(ExtractionError::RowFailed { row, message });
    }
    if job.errors.len() >= processing.max_errors {
        return Err(ExtractionError::ErrorLimitExceeded {
            max: processing.max_errors,
            last_error: message,
        });
    }
    Ok(())
}
