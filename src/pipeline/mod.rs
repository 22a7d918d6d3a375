pub mod preprocess;
pub mod rag;
pub mod llm;
pub mod extraction;
pub mod dataset;
pub mod jobs;
pub mod orchestrator; // Row/datapoint loop with checkpoints and cancellation
pub mod metrics;
