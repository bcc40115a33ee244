//! Shared configuration types for reel workers.

mod base;
mod batch;
mod joiner;
mod limits;
mod query;
mod reducer;
mod topology;
mod worker;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use joiner::{JoinerConfig, JoinerQueues};
pub use limits::SessionLimitsConfig;
pub use query::QueryKind;
pub use reducer::{QueryQueues, ReducerConfig};
pub use topology::TopologyConfig;
pub use worker::WorkerConfig;
