//! Datapoint extraction: configuration, prompt assembly, response parsing,
//! validation and confidence scoring.

pub mod types;
pub mod prompt;
pub mod validation;
pub mod parser;
pub mod confidence;

pub use types::*;
pub use prompt::*;
pub use validation::*;
pub use parser::*;
pub use confidence::*;

use thiserror::Error;

use crate::pipeline::dataset::DatasetError;
use crate::pipeline::jobs::StoreError;
use crate::pipeline::llm::GenerationError;
use crate::pipeline::rag::RagError;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Invalid extraction configuration: {0}")]
    InvalidConfig(String),

    #[error("Text column '{0}' not found in dataset")]
    MissingTextColumn(String),

    #[error("Invalid validation pattern for datapoint '{datapoint}': {reason}")]
    InvalidPattern { datapoint: String, reason: String },

    #[error("Row {row} failed: {message}")]
    RowFailed { row: usize, message: String },

    #[error("Maximum errors ({max}) exceeded; last error: {last_error}")]
    ErrorLimitExceeded { max: usize, last_error: String },

    #[error("Job task failed: {0}")]
    TaskFailed(String),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RagError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),
}
