use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, warn};

use crate::bail;
use crate::bus::{Delivery, MessageBus, Subscription};
use crate::error::{ErrorKind, ReelResult};
use crate::reel_error;

#[derive(Debug)]
struct Message {
    payload: Bytes,
    redelivered: bool,
}

#[derive(Debug)]
struct QueueState {
    tx: Option<mpsc::UnboundedSender<Message>>,
    rx: Option<mpsc::UnboundedReceiver<Message>>,
    publishes: usize,
    history: Option<Vec<Bytes>>,
    acked: usize,
    rejected: usize,
    publish_faults: usize,
    published_waiters: Vec<(usize, Arc<Notify>)>,
}

impl QueueState {
    fn new(keep_history: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            tx: Some(tx),
            rx: Some(rx),
            publishes: 0,
            history: keep_history.then(Vec::new),
            acked: 0,
            rejected: 0,
            publish_faults: 0,
            published_waiters: Vec::new(),
        }
    }

    fn notify_published_waiters(&mut self) {
        let published = self.publishes;
        self.published_waiters.retain(|(count, notify)| {
            if published >= *count {
                notify.notify_one();
                return false;
            }

            true
        });
    }
}

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<String, QueueState>,
    keep_history: bool,
    closed: bool,
}

impl Inner {
    fn queue(&mut self, name: &str) -> &mut QueueState {
        let keep_history = self.keep_history;
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| QueueState::new(keep_history))
    }
}

/// In-process message bus backed by unbounded tokio channels.
///
/// [`MemoryBus`] wires the stages of a local topology together and backs the tests. Queues are
/// declared on first use by either side and each queue admits a single consumer. A bus built with
/// [`MemoryBus::with_history`] also keeps every published payload so that tests can inspect what
/// a stage emitted. Publish failures can be injected per queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus recording every published payload, see [`MemoryBus::published`].
    pub fn with_history() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                keep_history: true,
                ..Inner::default()
            })),
        }
    }

    /// Returns every payload successfully published to `queue`, in publish order.
    ///
    /// Always empty unless the bus was built with [`MemoryBus::with_history`].
    pub async fn published(&self, queue: &str) -> Vec<Bytes> {
        let inner = self.inner.lock().await;
        inner
            .queues
            .get(queue)
            .and_then(|state| state.history.clone())
            .unwrap_or_default()
    }

    /// Returns how many deliveries of `queue` were acknowledged.
    pub async fn acked(&self, queue: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.queues.get(queue).map_or(0, |state| state.acked)
    }

    /// Returns how many deliveries of `queue` were rejected, with or without requeue.
    pub async fn rejected(&self, queue: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.queues.get(queue).map_or(0, |state| state.rejected)
    }

    /// Makes the next `count` publishes to `queue` fail with [`ErrorKind::BusPublishFailed`].
    pub async fn fail_next_publishes(&self, queue: &str, count: usize) {
        let mut inner = self.inner.lock().await;
        inner.queue(queue).publish_faults = count;
    }

    /// Returns a [`Notify`] triggered once `queue` has seen at least `count` publishes. Works
    /// with or without history.
    ///
    /// When the condition already holds the permit is stored immediately, so awaiting the
    /// returned notify never misses it.
    pub async fn notify_on_published(&self, queue: &str, count: usize) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());

        let mut inner = self.inner.lock().await;
        let state = inner.queue(queue);
        state.published_waiters.push((count, notify.clone()));
        state.notify_published_waiters();

        notify
    }

    /// Closes every queue. Consumers drain what is already queued and then observe the end of
    /// their subscription, while further publishes fail.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        for state in inner.queues.values_mut() {
            state.tx = None;
        }
    }

    async fn settle(&self, queue: &str, payload: Bytes, outcome: Settlement) -> ReelResult<()> {
        let mut inner = self.inner.lock().await;
        let state = inner.queue(queue);

        match outcome {
            Settlement::Ack => state.acked += 1,
            Settlement::Reject { requeue } => {
                state.rejected += 1;

                if !requeue {
                    return Ok(());
                }

                let Some(tx) = &state.tx else {
                    warn!(queue, "queue closed, dropping requeued message");
                    return Ok(());
                };

                tx.send(Message {
                    payload,
                    redelivered: true,
                })
                .map_err(|_| {
                    reel_error!(
                        ErrorKind::BusAckFailed,
                        "Failed to requeue rejected message",
                        format!("consumer of queue '{queue}' is gone")
                    )
                })?;
            }
        }

        Ok(())
    }
}

enum Settlement {
    Ack,
    Reject { requeue: bool },
}

impl MessageBus for MemoryBus {
    type Subscription = MemorySubscription;

    fn name() -> &'static str {
        "memory"
    }

    async fn subscribe(&self, queue: &str) -> ReelResult<MemorySubscription> {
        let mut inner = self.inner.lock().await;

        let Some(rx) = inner.queue(queue).rx.take() else {
            bail!(
                ErrorKind::InvalidState,
                "Queue already has a consumer",
                format!("queue '{queue}' can only be consumed once")
            );
        };

        debug!(queue, "subscribed to queue");

        Ok(MemorySubscription {
            queue: queue.to_string(),
            rx,
            bus: self.clone(),
        })
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> ReelResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            bail!(
                ErrorKind::BusClosed,
                "Bus is closed",
                format!("cannot publish to queue '{queue}'")
            );
        }

        let state = inner.queue(queue);
        if state.publish_faults > 0 {
            state.publish_faults -= 1;
            bail!(
                ErrorKind::BusPublishFailed,
                "Injected publish failure",
                format!("queue '{queue}'")
            );
        }

        let Some(tx) = &state.tx else {
            bail!(
                ErrorKind::BusClosed,
                "Queue is closed",
                format!("cannot publish to queue '{queue}'")
            );
        };

        let recorded = state.history.is_some().then(|| payload.clone());
        tx.send(Message {
            payload,
            redelivered: false,
        })
        .map_err(|_| {
            reel_error!(
                ErrorKind::BusPublishFailed,
                "Failed to publish message",
                format!("consumer of queue '{queue}' is gone")
            )
        })?;

        state.publishes += 1;
        if let (Some(history), Some(payload)) = (&mut state.history, recorded) {
            history.push(payload);
        }
        state.notify_published_waiters();

        Ok(())
    }
}

/// Consumer side of one [`MemoryBus`] queue.
#[derive(Debug)]
pub struct MemorySubscription {
    queue: String,
    rx: mpsc::UnboundedReceiver<Message>,
    bus: MemoryBus,
}

impl Subscription for MemorySubscription {
    type Delivery = MemoryDelivery;

    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next_delivery(&mut self) -> Option<MemoryDelivery> {
        let message = self.rx.recv().await?;

        Some(MemoryDelivery {
            queue: self.queue.clone(),
            payload: message.payload,
            redelivered: message.redelivered,
            bus: self.bus.clone(),
        })
    }
}

/// A message received from a [`MemoryBus`] queue.
#[derive(Debug)]
pub struct MemoryDelivery {
    queue: String,
    payload: Bytes,
    redelivered: bool,
    bus: MemoryBus,
}

impl Delivery for MemoryDelivery {
    fn payload(&self) -> &Bytes {
        &self.payload
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(self) -> ReelResult<()> {
        self.bus
            .settle(&self.queue, self.payload, Settlement::Ack)
            .await
    }

    async fn reject(self, requeue: bool) -> ReelResult<()> {
        self.bus
            .settle(&self.queue, self.payload, Settlement::Reject { requeue })
            .await
    }
}
