use serde::de::DeserializeOwned;

use crate::bus::memory::MemoryBus;
use crate::test_utils::notify::TimedNotify;
use crate::types::Batch;

/// Decodes every batch published to `queue`.
pub async fn published_batches<T: DeserializeOwned>(bus: &MemoryBus, queue: &str) -> Vec<Batch<T>> {
    decode_all(bus, queue).await
}

/// Decodes every message published to `queue` as `T`.
pub async fn decode_all<T: DeserializeOwned>(bus: &MemoryBus, queue: &str) -> Vec<T> {
    bus.published(queue)
        .await
        .iter()
        .map(|payload| serde_json::from_slice(payload).expect("failed to decode published message"))
        .collect()
}

/// Waits until `queue` has seen at least `count` publishes.
///
/// # Panics
///
/// Panics when the count is not reached within the default [`TimedNotify`] timeout.
pub async fn wait_for_published(bus: &MemoryBus, queue: &str, count: usize) {
    let notify = bus.notify_on_published(queue, count).await;
    TimedNotify::new(notify).notified().await;
}
