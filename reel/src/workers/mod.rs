//! Worker tasks running the pipeline stages.

pub mod base;
pub mod joiner;
pub mod reducer;

pub use base::WorkerHandle;
pub use joiner::JoinWorker;
pub use reducer::{FinalReduceWorker, PartialReduceWorker};
