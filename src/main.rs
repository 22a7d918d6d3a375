use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;
use uuid::Uuid;

use medextract_lib::config;
use medextract_lib::pipeline::dataset::{read_table, write_table, DatasetError, TableFormat};
use medextract_lib::pipeline::extraction::{ExtractionConfig, ExtractionError};
use medextract_lib::pipeline::jobs::{
    FileCheckpointStore, FileJobStore, Job, JobManager, JobStatus, StoreError,
};
use medextract_lib::pipeline::llm::{
    GenerationError, ModelBackend, ModelConfig, ModelInvoker, OllamaBackend,
};
use medextract_lib::pipeline::metrics::evaluate;
use medextract_lib::pipeline::orchestrator::{progress_channel, ExtractionOrchestrator, ProgressReceiver};
use medextract_lib::pipeline::rag::{ContextRetriever, LocalModelProvider, ModelCache};

#[derive(Parser, Debug)]
#[command(name = "medextract", version, about = "Extract validated datapoints from medical reports")]
struct Cli {
    /// Ollama server URL
    #[arg(long, value_name = "URL", env = "MEDEXTRACT_OLLAMA_URL", default_value = config::DEFAULT_OLLAMA_URL)]
    ollama_url: String,
    /// Directory holding jobs, checkpoints and local models
    #[arg(long, value_name = "DIR", env = config::DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one extraction job over a table of reports
    Run {
        /// ExtractionConfig as JSON
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
        /// Input table (.csv, .json or .jsonl)
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Result table with _raw/_cleaned/_confidence columns added
        #[arg(long, value_name = "FILE")]
        output: PathBuf,
        /// Output format; guessed from the output extension when omitted
        #[arg(long, value_name = "FORMAT")]
        format: Option<TableFormat>,
        /// Write the evaluation report as JSON
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
        /// Resume a job from its checkpoint
        #[arg(long, value_name = "JOB_ID")]
        resume: Option<Uuid>,
        /// Override the model named in the config
        #[arg(long, value_name = "MODEL", env = "MEDEXTRACT_MODEL")]
        model: Option<String>,
    },
    /// List models available on the backend
    Models,
    /// Check the backend and print a health report
    Health,
    /// Delete job records and checkpoints older than a number of days
    Cleanup {
        #[arg(long, value_name = "DAYS", default_value_t = 30)]
        days: u64,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    #[error("{0}")]
    Dataset(#[from] DatasetError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Generation(#[from] GenerationError),

    #[error("Cannot read {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    medextract_lib::init_tracing();
    let cli = Cli::parse();
    let data_dir = cli.data_dir.clone().unwrap_or_else(config::app_data_dir);

    let outcome = match cli.command {
        Command::Run {
            config,
            input,
            output,
            format,
            report,
            resume,
            model,
        } => {
            let args = RunArgs {
                config,
                input,
                output,
                format,
                report,
                resume,
                model,
            };
            run(&cli.ollama_url, &data_dir, args).await
        }
        Command::Models => models(&cli.ollama_url).await,
        Command::Health => health(&cli.ollama_url).await,
        Command::Cleanup { days } => cleanup(&data_dir, days),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "medextract failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

struct RunArgs {
    config: PathBuf,
    input: PathBuf,
    output: PathBuf,
    format: Option<TableFormat>,
    report: Option<PathBuf>,
    resume: Option<Uuid>,
    model: Option<String>,
}

fn load_config(path: &Path) -> Result<ExtractionConfig, CliError> {
    let file = File::open(path).map_err(|e| CliError::Config {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| CliError::Config {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

async fn run(ollama_url: &str, data_dir: &Path, args: RunArgs) -> Result<(), CliError> {
    let mut config = load_config(&args.config)?;
    if let Some(model) = args.model {
        config.model.model = model;
    }
    let output_format = match args.format {
        Some(format) => format,
        None => TableFormat::from_path(&args.output)?,
    };
    let dataset = read_table(&args.input, TableFormat::from_path(&args.input)?)?;
    tracing::info!(
        input = %args.input.display(),
        rows = dataset.len(),
        columns = dataset.columns().len(),
        "Loaded input table"
    );

    let backend = Arc::new(OllamaBackend::new(ollama_url, config.model.timeout_secs)?);
    let checkpoints = Arc::new(FileCheckpointStore::new(data_dir.join("checkpoints"))?);
    let store = Arc::new(FileJobStore::new(data_dir.join("jobs"))?);
    let cache = ModelCache::new(Arc::new(LocalModelProvider::new(data_dir.join("models"))));

    let (tx, rx) = progress_channel();
    let orchestrator = ExtractionOrchestrator::new(
        backend,
        Arc::new(ContextRetriever::new(Arc::new(cache))),
        checkpoints,
    )
    .with_progress(tx);
    let manager = Arc::new(JobManager::new(store, Arc::new(orchestrator), 1));
    let logger = tokio::spawn(log_progress(rx));

    let job = match args.resume {
        Some(id) => Job::with_id(id, config.clone()),
        None => Job::new(config.clone()),
    };
    let cancel = job.cancel_flag();
    let id = manager.submit_job(job, dataset)?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(job_id = %id, "Interrupt received, stopping after the current row");
            cancel.cancel();
        }
    });

    let outcome = manager.wait(&id).await;
    let finished = manager.status(&id)?;
    drop(manager);
    let _ = logger.await;

    let table = outcome?;
    write_table(&table.to_dataset(), &args.output, output_format)?;

    if let Some(path) = &args.report {
        let report = evaluate(&table, &config.datapoints, &config.evaluation);
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), &report)?;
        tracing::info!(path = %path.display(), "Wrote evaluation report");
    }

    if let Some(job) = finished {
        println!(
            "Job {} {}: {}/{} rows, {} errors, {} warnings",
            job.id,
            job.status,
            job.progress.processed_rows,
            job.progress.total_rows,
            job.errors.len(),
            job.progress.warning_count
        );
        if job.status == JobStatus::Cancelled {
            println!("Resume with: medextract run ... --resume {}", job.id);
        }
    }
    Ok(())
}

/// Log lifecycle events and every tenth of the way through a job.
async fn log_progress(mut rx: ProgressReceiver) {
    let mut last_decile = None;
    while let Some(event) = rx.recv().await {
        let decile = (event.percentage / 10.0) as u32;
        if event.status != JobStatus::Running || last_decile != Some(decile) {
            tracing::info!(
                job_id = %event.job_id,
                status = %event.status,
                row = event.current_row,
                total = event.total_rows,
                percent = format!("{:.1}", event.percentage),
                "{}",
                event.message
            );
            last_decile = Some(decile);
        } else {
            tracing::debug!(job_id = %event.job_id, row = event.current_row, "{}", event.message);
        }
    }
}

async fn models(ollama_url: &str) -> Result<(), CliError> {
    let backend = OllamaBackend::new(ollama_url, 30)?;
    for model in backend.list_models().await? {
        println!("{model}");
    }
    Ok(())
}

async fn health(ollama_url: &str) -> Result<(), CliError> {
    let backend = Arc::new(OllamaBackend::new(ollama_url, 60)?);
    let invoker = ModelInvoker::new(backend, ModelConfig::default());
    let report = invoker.health_check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cleanup(data_dir: &Path, days: u64) -> Result<(), CliError> {
    let age = Duration::from_secs(days.saturating_mul(24 * 3600));
    let checkpoints = FileCheckpointStore::new(data_dir.join("checkpoints"))?.cleanup_older_than(age)?;
    let jobs = FileJobStore::new(data_dir.join("jobs"))?.cleanup_older_than(age)?;
    println!("Removed {checkpoints} checkpoints and {jobs} job records older than {days} days");
    Ok(())
}
