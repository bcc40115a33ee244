//! Metric names and labels recorded by the pipeline stages.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};

/// Label for the worker emitting a metric.
pub const WORKER_LABEL: &str = "worker";

/// Label for the input relation a batch belongs to.
pub const STREAM_LABEL: &str = "stream";

/// Label for the query a reducer computes.
pub const QUERY_LABEL: &str = "query";

/// Label for the kind of protocol violation.
pub const VIOLATION_LABEL: &str = "violation";

/// Label for the reason a message was dropped.
pub const REASON_LABEL: &str = "reason";

// Joiner metrics

/// Counter for batches processed by a joiner, labelled by stream.
pub const REEL_JOINER_BATCHES_TOTAL: &str = "reel_joiner_batches_total";

/// Counter for rows emitted by the review join.
pub const REEL_JOINED_ROWS_TOTAL: &str = "reel_joined_rows_total";

/// Gauge for probe batches buffered while awaiting movies.
pub const REEL_PENDING_BATCHES: &str = "reel_pending_batches";

/// Gauge for live join sessions.
pub const REEL_JOIN_SESSIONS: &str = "reel_join_sessions";

// Shared metrics

/// Counter for payloads that failed to decode.
pub const REEL_DECODE_FAILURES_TOTAL: &str = "reel_decode_failures_total";

/// Counter for protocol violations, labelled by violation.
pub const REEL_PROTOCOL_VIOLATIONS_TOTAL: &str = "reel_protocol_violations_total";

/// Counter for messages dropped without being processed, labelled by reason.
pub const REEL_DROPPED_BATCHES_TOTAL: &str = "reel_dropped_batches_total";

/// Counter for publish attempts that failed and were left for redelivery.
pub const REEL_PUBLISH_FAILURES_TOTAL: &str = "reel_publish_failures_total";

// Reducer metrics

/// Counter for batches processed by reducers, labelled by query.
pub const REEL_REDUCER_BATCHES_TOTAL: &str = "reel_reducer_batches_total";

/// Counter for final results emitted, labelled by query.
pub const REEL_FINAL_RESULTS_TOTAL: &str = "reel_final_results_total";

static REGISTER_METRICS: Once = Once::new();

/// Describes every metric to the installed recorder. Safe to call more than once.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            REEL_JOINER_BATCHES_TOTAL,
            Unit::Count,
            "Batches processed by a joiner shard."
        );
        describe_counter!(
            REEL_JOINED_ROWS_TOTAL,
            Unit::Count,
            "Movie and review pairs emitted by the join."
        );
        describe_gauge!(
            REEL_PENDING_BATCHES,
            Unit::Count,
            "Probe batches buffered while the movie relation is incomplete."
        );
        describe_gauge!(REEL_JOIN_SESSIONS, Unit::Count, "Live join sessions.");
        describe_counter!(
            REEL_DECODE_FAILURES_TOTAL,
            Unit::Count,
            "Payloads that could not be decoded."
        );
        describe_counter!(
            REEL_PROTOCOL_VIOLATIONS_TOTAL,
            Unit::Count,
            "Batches inconsistent with the completion protocol."
        );
        describe_counter!(
            REEL_DROPPED_BATCHES_TOTAL,
            Unit::Count,
            "Messages acknowledged or rejected without being processed."
        );
        describe_counter!(
            REEL_PUBLISH_FAILURES_TOTAL,
            Unit::Count,
            "Publishes that failed and left the inbound message for redelivery."
        );
        describe_counter!(
            REEL_REDUCER_BATCHES_TOTAL,
            Unit::Count,
            "Batches processed by reducers."
        );
        describe_counter!(
            REEL_FINAL_RESULTS_TOTAL,
            Unit::Count,
            "Final query results published."
        );
    });
}
