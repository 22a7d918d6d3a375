//! Job execution: runs an extraction job row by row over a dataset,
//! checkpointing as it goes and reporting progress on a channel.

pub mod progress;
pub mod runner;

pub use progress::*;
pub use runner::*;
