//! Job state, cancellation, persistence of job metadata and checkpoints,
//! and the manager running jobs as background tasks.

pub mod types;
pub mod cancel;
pub mod store;
pub mod checkpoint;
pub mod manager;

pub use types::*;
pub use cancel::*;
pub use store::*;
pub use checkpoint::*;
pub use manager::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to persist {path}: {reason}")]
    Persist { path: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}
