pub mod config;
pub mod pipeline;

use tracing_subscriber::EnvFilter;

pub use pipeline::extraction::{DatapointSpec, ExtractionConfig, ExtractionError};
pub use pipeline::jobs::{Job, JobStatus};
pub use pipeline::orchestrator::ExtractionOrchestrator;

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG` when set, otherwise falls back to
/// [`config::default_log_filter`]. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}
