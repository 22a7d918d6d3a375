//! Language-model invocation: backend abstraction, Ollama client,
//! retrying invoker and response sanitizing.

pub mod types;
pub mod sanitize;
pub mod ollama;
pub mod invoker;

pub use types::*;
pub use sanitize::*;
pub use ollama::*;
pub use invoker::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Ollama is not running at {0}")]
    Connection(String),

    #[error("Model backend returned error (status {status}): {body}")]
    Backend { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Model {0} is not available")]
    ModelUnavailable(String),

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: Box<GenerationError>,
    },
}
