//! Telemetry setup shared by reel binaries and tests.

pub mod metrics;
pub mod tracing;
