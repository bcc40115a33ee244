use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use metrics::{counter, gauge};
use reel_config::shared::{JoinerConfig, JoinerQueues};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::bus::settle::{drop_late, reject_for_redelivery, reject_refused, reject_undecodable};
use crate::bus::{Delivery, MessageBus, Subscription};
use crate::completion::Progress;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, ReelError, ReelResult};
use crate::joiner::session::{JoinSession, MoviesOutcome, PendingBatch, Probe};
use crate::joiner::store::{Admission, SessionStore};
use crate::metrics::{
    REASON_LABEL, REEL_DROPPED_BATCHES_TOTAL, REEL_JOINED_ROWS_TOTAL, REEL_JOINER_BATCHES_TOTAL,
    REEL_PENDING_BATCHES, REEL_PUBLISH_FAILURES_TOTAL, STREAM_LABEL, WORKER_LABEL,
};
use crate::types::{Batch, BatchKind, ClientId, Credit, Movie, MovieReview, Review};

/// Encoded output of one probe batch, ready to be published.
struct JoinOutput {
    queue: String,
    payload: Bytes,
    rows: usize,
}

/// Control loop of one joiner shard.
///
/// The loop is the only owner of the session store. It multiplexes the three inbound queues
/// of the shard and replays buffered probes through an internal queue of drain requests, which
/// are served before any new delivery is read. A replay whose publish fails is retried after
/// `replay_retry_delay_ms`, while the inbound queues keep being served.
///
/// The review and credit queues are not consumed at all until at least one client completed its
/// movie relation.
#[derive(Debug)]
pub struct JoinLoop<B> {
    worker: String,
    bus: B,
    queues: JoinerQueues,
    store: SessionStore,
    drains: VecDeque<ClientId>,
    replay_retry_delay: Duration,
    replay_retry_at: Option<Instant>,
    probes_open: bool,
}

impl<B> JoinLoop<B>
where
    B: MessageBus + Send + Sync,
{
    pub fn new(config: &JoinerConfig, bus: B) -> Self {
        let worker = format!("joiner-{}", config.shard_id);

        Self {
            store: SessionStore::new(worker.clone(), config.limits.clone()),
            worker,
            bus,
            queues: config.queues(),
            drains: VecDeque::new(),
            replay_retry_delay: Duration::from_millis(config.replay_retry_delay_ms),
            replay_retry_at: None,
            probes_open: false,
        }
    }

    /// Runs the loop until shutdown is requested or every inbound queue is closed.
    ///
    /// Only acknowledgement failures end the loop with an error. Publish failures are settled
    /// per delivery or retried.
    pub async fn run(
        mut self,
        mut movies: B::Subscription,
        mut reviews: B::Subscription,
        mut credits: B::Subscription,
        mut shutdown_rx: ShutdownRx,
    ) -> ReelResult<()> {
        let mut movies_open = true;
        let mut reviews_open = true;
        let mut credits_open = true;

        loop {
            while self.replay_retry_at.is_none()
                && let Some(client_id) = self.drains.pop_front()
            {
                self.drain(&client_id).await?;
            }

            if self.drains.is_empty()
                && !movies_open
                && (!self.probes_open || (!reviews_open && !credits_open))
            {
                info!("inbound queues closed, stopping join loop");
                return Ok(());
            }

            let retry_at = self.replay_retry_at.unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!(
                        sessions = self.store.len(),
                        pending = self.store.pending_batches(),
                        "shutting down join loop"
                    );
                    return Ok(());
                }

                _ = tokio::time::sleep_until(retry_at), if self.replay_retry_at.is_some() => {
                    debug!(clients = self.drains.len(), "retrying replay of buffered probes");
                    self.replay_retry_at = None;
                }

                delivery = movies.next_delivery(), if movies_open => {
                    match delivery {
                        Some(delivery) => self.handle_movies(delivery).await?,
                        None => {
                            info!(queue = movies.queue(), "movie queue closed");
                            movies_open = false;
                        }
                    }
                }

                delivery = reviews.next_delivery(), if self.probes_open && reviews_open => {
                    match delivery {
                        Some(delivery) => self.handle_reviews(delivery).await?,
                        None => {
                            info!(queue = reviews.queue(), "review queue closed");
                            reviews_open = false;
                        }
                    }
                }

                delivery = credits.next_delivery(), if self.probes_open && credits_open => {
                    match delivery {
                        Some(delivery) => self.handle_credits(delivery).await?,
                        None => {
                            info!(queue = credits.queue(), "credit queue closed");
                            credits_open = false;
                        }
                    }
                }
            }
        }
    }

    async fn handle_movies(
        &mut self,
        delivery: <B::Subscription as Subscription>::Delivery,
    ) -> ReelResult<()> {
        let batch = match Batch::<Movie>::decode(delivery.payload()) {
            Ok(batch) => batch,
            Err(err) => return reject_undecodable(&self.worker, "movies", delivery, err).await,
        };
        record_batch(&self.worker, "movies");

        let client_id = batch.client_id().clone();
        if batch.kind() == BatchKind::Cleanup {
            self.discard(&client_id, "movies");
            return delivery.ack().await;
        }

        match self.store.admit(&client_id) {
            Ok(Admission::Live) => {}
            Ok(Admission::Finished) => {
                return drop_late(&self.worker, "movies", &client_id, delivery).await;
            }
            Err(err) => return self.refuse(&client_id, "movies", delivery, err).await,
        }
        let session = live_session(&mut self.store, &client_id)?;

        match session.add_movies(batch) {
            Ok(MoviesOutcome::Accumulating) => {}
            Ok(MoviesOutcome::Completed { drain }) => {
                info!(
                    client_id = %client_id,
                    movies = session.movies().len(),
                    buffered = session.pending_len(),
                    "movie relation complete, joining"
                );

                if drain {
                    self.drains.push_back(client_id.clone());
                } else if session.try_finish() {
                    self.finish(&client_id);
                }

                if !self.probes_open {
                    info!("first movie relation complete, consuming reviews and credits");
                    self.probes_open = true;
                }
            }
            Err(err) => {
                warn!(client_id = %client_id, error = %err, "ignoring inconsistent movie batch");
            }
        }

        delivery.ack().await
    }

    async fn handle_reviews(
        &mut self,
        delivery: <B::Subscription as Subscription>::Delivery,
    ) -> ReelResult<()> {
        match Batch::<Review>::decode(delivery.payload()) {
            Ok(batch) => self.handle_probe(delivery, PendingBatch::Reviews(batch)).await,
            Err(err) => reject_undecodable(&self.worker, "reviews", delivery, err).await,
        }
    }

    async fn handle_credits(
        &mut self,
        delivery: <B::Subscription as Subscription>::Delivery,
    ) -> ReelResult<()> {
        match Batch::<Credit>::decode(delivery.payload()) {
            Ok(batch) => self.handle_probe(delivery, PendingBatch::Credits(batch)).await,
            Err(err) => reject_undecodable(&self.worker, "credits", delivery, err).await,
        }
    }

    async fn handle_probe(
        &mut self,
        delivery: <B::Subscription as Subscription>::Delivery,
        batch: PendingBatch,
    ) -> ReelResult<()> {
        let probe = batch.probe();
        let stream = probe.as_str();
        record_batch(&self.worker, stream);

        let client_id = batch.header().client_id.clone();
        if batch.header().kind() == BatchKind::Cleanup {
            self.discard(&client_id, stream);

            let output = cleanup_output(&self.queues, probe, &client_id)?;
            if let Err(err) = self.bus.publish(&output.queue, output.payload).await {
                return reject_for_redelivery(&self.worker, stream, delivery, err).await;
            }

            return delivery.ack().await;
        }

        match self.store.admit(&client_id) {
            Ok(Admission::Live) => {}
            Ok(Admission::Finished) => {
                return drop_late(&self.worker, stream, &client_id, delivery).await;
            }
            Err(err) => return self.refuse(&client_id, stream, delivery, err).await,
        }
        let session = live_session(&mut self.store, &client_id)?;

        if !session.accepts_live_probes() {
            let buffered = session.buffer(batch);
            let pending = session.pending_len();

            match buffered {
                Ok(_) => {
                    debug!(
                        client_id = %client_id,
                        stream,
                        buffered = pending,
                        "buffered probe batch until movies are complete"
                    );
                }
                Err(err) if err.kind() == ErrorKind::PendingBufferOverflow => {
                    error!(
                        client_id = %client_id,
                        stream,
                        error = %err,
                        "pending buffer overflow, aborting client"
                    );
                    counter!(
                        REEL_DROPPED_BATCHES_TOTAL,
                        WORKER_LABEL => self.worker.clone(),
                        REASON_LABEL => "pending_overflow"
                    )
                    .increment(1);

                    if let Err(err) = self.abort(&client_id).await {
                        return reject_for_redelivery(&self.worker, stream, delivery, err).await;
                    }
                }
                Err(err) => {
                    warn!(client_id = %client_id, stream, error = %err, "ignoring inconsistent probe batch");
                }
            }

            self.record_pending();
            return delivery.ack().await;
        }

        if let Err(err) = session.check_probe(probe, batch.header()) {
            warn!(client_id = %client_id, stream, error = %err, "dropping inconsistent probe batch");
            return delivery.ack().await;
        }

        // The output is published before any state changes, so a failed publish leaves the
        // session exactly as it was for the redelivery.
        let output = join_output(session, &self.queues, &batch)?;
        let rows = output.rows;
        if let Err(err) = self.bus.publish(&output.queue, output.payload).await {
            return reject_for_redelivery(&self.worker, stream, delivery, err).await;
        }

        if probe == Probe::Reviews {
            counter!(REEL_JOINED_ROWS_TOTAL, WORKER_LABEL => self.worker.clone())
                .increment(rows as u64);
        }

        let Some(session) = self.store.get_mut(&client_id) else {
            return delivery.ack().await;
        };

        match session.register_probe(probe, batch.header()) {
            Ok(Progress::Completed) => {
                debug!(client_id = %client_id, stream, "probe stream complete");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(client_id = %client_id, stream, error = %err, "inconsistent probe batch forwarded");
            }
        }

        if session.try_finish() {
            self.finish(&client_id);
        }

        delivery.ack().await
    }

    /// Replays the buffered probes of a client in arrival order.
    ///
    /// The buffered batches were already acknowledged, so the bus cannot redeliver them. A failed
    /// publish puts the batch back at the head of the buffer and schedules the client for
    /// another replay once the retry delay elapsed.
    async fn drain(&mut self, client_id: &ClientId) -> ReelResult<()> {
        let mut replayed = 0usize;

        loop {
            let Some(session) = self.store.get_mut(client_id) else {
                debug!(client_id = %client_id, "session discarded before drain");
                return Ok(());
            };

            let Some(batch) = session.next_pending() else {
                break;
            };

            let output = join_output(session, &self.queues, &batch)?;
            let rows = output.rows;
            if let Err(err) = self.bus.publish(&output.queue, output.payload).await {
                let stream = batch.probe().as_str();
                if let Some(session) = self.store.get_mut(client_id) {
                    session.restore_pending(batch);
                }
                self.drains.push_front(client_id.clone());
                self.replay_retry_at = Some(Instant::now() + self.replay_retry_delay);
                self.record_pending();

                warn!(
                    client_id = %client_id,
                    replayed,
                    retry_in = ?self.replay_retry_delay,
                    error = %err,
                    "failed to publish replayed probe batch"
                );
                counter!(
                    REEL_PUBLISH_FAILURES_TOTAL,
                    WORKER_LABEL => self.worker.clone(),
                    STREAM_LABEL => stream
                )
                .increment(1);

                return Ok(());
            }

            if batch.probe() == Probe::Reviews {
                counter!(REEL_JOINED_ROWS_TOTAL, WORKER_LABEL => self.worker.clone())
                    .increment(rows as u64);
            }
            replayed += 1;
        }

        info!(client_id = %client_id, replayed, "replayed buffered probe batches");

        if let Some(session) = self.store.get_mut(client_id) {
            session.finish_drain();
            if session.try_finish() {
                self.finish(client_id);
            }
        }
        self.record_pending();

        Ok(())
    }

    /// Drops a batch of a client refused by the session limit and aborts the client, so that its
    /// later batches are dropped too instead of opening a session that misses this one.
    async fn refuse(
        &mut self,
        client_id: &ClientId,
        stream: &'static str,
        delivery: <B::Subscription as Subscription>::Delivery,
        err: ReelError,
    ) -> ReelResult<()> {
        if let Err(publish_err) = self.abort(client_id).await {
            return reject_for_redelivery(&self.worker, stream, delivery, publish_err).await;
        }

        reject_refused(&self.worker, stream, delivery, err).await
    }

    /// Forwards cleanup markers for `client_id` on both outputs and forgets its session.
    ///
    /// Downstream stages discard whatever they aggregated for the client instead of waiting for a
    /// stream that will never complete. On a publish failure the session is left in place.
    async fn abort(&mut self, client_id: &ClientId) -> ReelResult<()> {
        for probe in [Probe::Reviews, Probe::Credits] {
            let output = cleanup_output(&self.queues, probe, client_id)?;
            self.bus.publish(&output.queue, output.payload).await?;
        }

        self.store.finish(client_id);
        self.drains.retain(|queued| queued != client_id);
        info!(client_id = %client_id, "client aborted, forwarded cleanup markers");

        Ok(())
    }

    fn finish(&mut self, client_id: &ClientId) {
        if let Some(session) = self.store.finish(client_id) {
            info!(
                client_id = %client_id,
                movies = session.movies().len(),
                reviews = session.probe_tracker(Probe::Reviews).received(),
                credits = session.probe_tracker(Probe::Credits).received(),
                "join session done"
            );
        }
    }

    fn discard(&mut self, client_id: &ClientId, stream: &'static str) {
        if self.store.finish(client_id).is_some() {
            info!(client_id = %client_id, stream, "client cleanup, discarded join session");
        }
        self.record_pending();
    }

    fn record_pending(&self) {
        gauge!(REEL_PENDING_BATCHES, WORKER_LABEL => self.worker.clone())
            .set(self.store.pending_batches() as f64);
    }
}

/// Returns the session `admit` just vouched for.
fn live_session<'a>(
    store: &'a mut SessionStore,
    client_id: &ClientId,
) -> ReelResult<&'a mut JoinSession> {
    match store.get_mut(client_id) {
        Some(session) => Ok(session),
        None => bail!(
            ErrorKind::InvalidState,
            "Join session missing after admission",
            client_id.to_string()
        ),
    }
}

/// Joins or filters a probe batch against the frozen movie relation of `session`.
fn join_output(
    session: &JoinSession,
    queues: &JoinerQueues,
    batch: &PendingBatch,
) -> ReelResult<JoinOutput> {
    match batch {
        PendingBatch::Reviews(batch) => {
            let joined = session.join_reviews(batch);
            Ok(JoinOutput {
                queue: queues.joined_reviews.clone(),
                rows: joined.data.len(),
                payload: joined.encode()?,
            })
        }
        PendingBatch::Credits(batch) => {
            let filtered = session.filter_credits(batch);
            Ok(JoinOutput {
                queue: queues.filtered_credits.clone(),
                rows: filtered.data.len(),
                payload: filtered.encode()?,
            })
        }
    }
}

/// Builds the cleanup marker forwarded downstream of a probe stream.
fn cleanup_output(
    queues: &JoinerQueues,
    probe: Probe,
    client_id: &ClientId,
) -> ReelResult<JoinOutput> {
    let output = match probe {
        Probe::Reviews => JoinOutput {
            queue: queues.joined_reviews.clone(),
            payload: Batch::<MovieReview>::cleanup(client_id.clone()).encode()?,
            rows: 0,
        },
        Probe::Credits => JoinOutput {
            queue: queues.filtered_credits.clone(),
            payload: Batch::<Credit>::cleanup(client_id.clone()).encode()?,
            rows: 0,
        },
    };

    Ok(output)
}

fn record_batch(worker: &str, stream: &'static str) {
    counter!(
        REEL_JOINER_BATCHES_TOTAL,
        WORKER_LABEL => worker.to_string(),
        STREAM_LABEL => stream
    )
    .increment(1);
}
