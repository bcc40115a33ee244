//! Settlement of inbound deliveries that a stage cannot process normally.
//!
//! Each helper logs the reason with structured fields, records it in the metrics and then acks
//! or rejects the delivery.

use metrics::counter;
use tracing::warn;

use crate::bus::Delivery;
use crate::error::{ReelError, ReelResult};
use crate::metrics::{
    REASON_LABEL, REEL_DECODE_FAILURES_TOTAL, REEL_DROPPED_BATCHES_TOTAL,
    REEL_PUBLISH_FAILURES_TOTAL, STREAM_LABEL, WORKER_LABEL,
};
use crate::types::ClientId;

/// Drops a payload that cannot be decoded. Redelivering it would fail the same way.
pub async fn reject_undecodable<D: Delivery>(
    worker: &str,
    stream: &'static str,
    delivery: D,
    err: ReelError,
) -> ReelResult<()> {
    warn!(worker, stream, error = %err, "dropping undecodable payload");
    counter!(
        REEL_DECODE_FAILURES_TOTAL,
        WORKER_LABEL => worker.to_string(),
        STREAM_LABEL => stream
    )
    .increment(1);

    delivery.reject(false).await
}

/// Leaves the delivery unacknowledged so the bus delivers it again.
pub async fn reject_for_redelivery<D: Delivery>(
    worker: &str,
    stream: &'static str,
    delivery: D,
    err: ReelError,
) -> ReelResult<()> {
    warn!(worker, stream, error = %err, "publish failed, requeueing inbound batch");
    counter!(
        REEL_PUBLISH_FAILURES_TOTAL,
        WORKER_LABEL => worker.to_string(),
        STREAM_LABEL => stream
    )
    .increment(1);

    delivery.reject(true).await
}

/// Acknowledges and drops a batch of a client that already finished.
pub async fn drop_late<D: Delivery>(
    worker: &str,
    stream: &'static str,
    client_id: &ClientId,
    delivery: D,
) -> ReelResult<()> {
    warn!(worker, stream, client_id = %client_id, "dropping batch of finished client");
    counter!(
        REEL_DROPPED_BATCHES_TOTAL,
        WORKER_LABEL => worker.to_string(),
        REASON_LABEL => "finished_client"
    )
    .increment(1);

    delivery.ack().await
}

/// Drops a batch of a client refused by the session limit.
pub async fn reject_refused<D: Delivery>(
    worker: &str,
    stream: &'static str,
    delivery: D,
    err: ReelError,
) -> ReelResult<()> {
    warn!(worker, stream, error = %err, "refusing batch of new client");
    counter!(
        REEL_DROPPED_BATCHES_TOTAL,
        WORKER_LABEL => worker.to_string(),
        REASON_LABEL => "session_limit"
    )
    .increment(1);

    delivery.reject(false).await
}
