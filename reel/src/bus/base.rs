use std::future::Future;

use bytes::Bytes;

use crate::error::ReelResult;

/// Trait for message buses connecting the pipeline stages.
///
/// [`MessageBus`] implementations must deliver every published payload at least once to the
/// single consumer of the queue it was published to. Messages rejected with requeue must be
/// delivered again. No ordering is expected across queues.
pub trait MessageBus {
    /// Consumer handle of one queue.
    type Subscription: Subscription + Send + 'static;

    /// Returns the name of the bus.
    fn name() -> &'static str;

    /// Starts consuming from `queue`, declaring it when it does not exist yet.
    fn subscribe(&self, queue: &str)
    -> impl Future<Output = ReelResult<Self::Subscription>> + Send;

    /// Publishes `payload` to `queue`.
    ///
    /// Once this returns `Ok` the payload is durably handed to the bus, and only then may the
    /// inbound message that produced it be acknowledged.
    fn publish(&self, queue: &str, payload: Bytes) -> impl Future<Output = ReelResult<()>> + Send;
}

/// Stream of deliveries from one queue.
pub trait Subscription {
    type Delivery: Delivery + Send + 'static;

    /// Returns the name of the consumed queue.
    fn queue(&self) -> &str;

    /// Waits for the next delivery, returning [`None`] once the queue is closed.
    ///
    /// The returned future must be cancel safe, since worker loops poll it inside
    /// `tokio::select!` together with other sources.
    fn next_delivery(&mut self) -> impl Future<Output = Option<Self::Delivery>> + Send;
}

/// A message received from a queue, settled exactly once by acknowledging or rejecting it.
pub trait Delivery {
    fn payload(&self) -> &Bytes;

    /// Returns `true` when the bus already delivered this message before.
    fn redelivered(&self) -> bool;

    /// Acknowledges the message so that it is never delivered again.
    fn ack(self) -> impl Future<Output = ReelResult<()>> + Send;

    /// Rejects the message, asking the bus to deliver it again when `requeue` is set.
    fn reject(self, requeue: bool) -> impl Future<Output = ReelResult<()>> + Send;
}
