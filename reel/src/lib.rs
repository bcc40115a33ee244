//! Completion-tracked stream join and shard aggregation for the movie analytics pipeline.
//!
//! Batches carry a weight and a terminal marker declares the total weight of a client's stream.
//! A stream is complete once the received weight equals the declared total, whatever order the
//! batches arrived in. The joiner gates its probe streams on the completion of the movie stream
//! and the final reducers emit a query result once every upstream shard's stream is complete.

pub mod bus;
pub mod clients;
pub mod completion;
pub mod concurrency;
pub mod error;
pub mod ingest;
pub mod joiner;
mod macros;
pub mod metrics;
pub mod reducer;
pub mod routing;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod topology;
pub mod types;
pub mod workers;
