use std::collections::HashMap;
use std::marker::PhantomData;

use bytes::Bytes;
use metrics::counter;
use reel_config::shared::{QueryQueues, ReducerConfig};
use tracing::{Instrument, debug, error, info, warn};

use crate::bail;
use crate::bus::settle::{drop_late, reject_for_redelivery, reject_refused, reject_undecodable};
use crate::bus::{Delivery, MessageBus, Subscription};
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, ReelResult};
use crate::metrics::{
    QUERY_LABEL, REASON_LABEL, REEL_DROPPED_BATCHES_TOTAL, REEL_FINAL_RESULTS_TOTAL,
    REEL_REDUCER_BATCHES_TOTAL, WORKER_LABEL,
};
use crate::reducer::{AggregationOutcome, PartialReducer, QueryAggregate, ShardAggregator};
use crate::types::{Batch, ClientId, QueryResult, encode_json};
use crate::workers::base::WorkerHandle;

/// Worker reducing the batches of one shard into partial results.
///
/// Consumes `q{n}-to-reduce` and publishes to `q{n}-to-final-reduce`.
#[derive(Debug)]
pub struct PartialReduceWorker<R, B> {
    reducer: R,
    shard_id: u16,
    bus: B,
    shutdown_rx: ShutdownRx,
}

impl<R, B> PartialReduceWorker<R, B> {
    pub fn new(reducer: R, shard_id: u16, bus: B, shutdown_rx: ShutdownRx) -> Self {
        Self {
            reducer,
            shard_id,
            bus,
            shutdown_rx,
        }
    }
}

impl<R, B> PartialReduceWorker<R, B>
where
    R: PartialReducer + Send + Sync + 'static,
    B: MessageBus + Send + Sync + 'static,
{
    pub async fn start(self) -> ReelResult<WorkerHandle> {
        let query = R::QUERY;
        let worker = format!("{query}-reducer-{}", self.shard_id);
        info!(%query, shard_id = self.shard_id, "starting partial reducer");

        let queues = QueryQueues::for_query(query);
        let subscription = self.bus.subscribe(&queues.to_reduce).await?;

        let span = tracing::info_span!("partial_reducer", %query, shard_id = self.shard_id);
        let name = worker.clone();
        let reduce_loop = PartialReduceLoop {
            worker,
            reducer: self.reducer,
            bus: self.bus,
            output_queue: queues.to_final_reduce,
        };
        let shutdown_rx = self.shutdown_rx;

        let task = async move {
            reduce_loop.run(subscription, shutdown_rx).await?;

            info!("partial reducer completed successfully");

            Ok(())
        }
        .instrument(span.or_current());

        Ok(WorkerHandle::new(name, tokio::spawn(task)))
    }
}

struct PartialReduceLoop<R, B> {
    worker: String,
    reducer: R,
    bus: B,
    output_queue: String,
}

impl<R, B> PartialReduceLoop<R, B>
where
    R: PartialReducer + Send + Sync,
    B: MessageBus + Send + Sync,
{
    async fn run(
        self,
        mut subscription: B::Subscription,
        mut shutdown_rx: ShutdownRx,
    ) -> ReelResult<()> {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("shutting down partial reducer");
                    return Ok(());
                }

                delivery = subscription.next_delivery() => {
                    let Some(delivery) = delivery else {
                        info!(queue = subscription.queue(), "inbound queue closed");
                        return Ok(());
                    };

                    self.handle(delivery).await?;
                }
            }
        }
    }

    async fn handle(&self, delivery: <B::Subscription as Subscription>::Delivery) -> ReelResult<()> {
        let batch = match Batch::<R::Input>::decode(delivery.payload()) {
            Ok(batch) => batch,
            Err(err) => return reject_undecodable(&self.worker, "partial", delivery, err).await,
        };
        counter!(
            REEL_REDUCER_BATCHES_TOTAL,
            WORKER_LABEL => self.worker.clone(),
            QUERY_LABEL => R::QUERY.to_string()
        )
        .increment(1);

        let header = batch.header.clone();
        let items = match self.reducer.reduce(batch.data) {
            Ok(items) => items,
            Err(err) => {
                // The header still travels downstream so the final reducer can complete.
                error!(
                    client_id = %header.client_id,
                    error = %err,
                    "dropping items of batch that cannot be reduced"
                );
                counter!(
                    REEL_DROPPED_BATCHES_TOTAL,
                    WORKER_LABEL => self.worker.clone(),
                    REASON_LABEL => "invalid_data"
                )
                .increment(1);

                Vec::new()
            }
        };

        let payload = Batch {
            header,
            data: items,
        }
        .encode()?;

        if let Err(err) = self.bus.publish(&self.output_queue, payload).await {
            return reject_for_redelivery(&self.worker, "partial", delivery, err).await;
        }

        delivery.ack().await
    }
}

/// Worker merging the partial results of every shard into the final answer of a query.
///
/// Consumes `q{n}-to-final-reduce` and publishes one [`QueryResult`] per client to
/// `q{n}-results`.
#[derive(Debug)]
pub struct FinalReduceWorker<A, B> {
    config: ReducerConfig,
    bus: B,
    shutdown_rx: ShutdownRx,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A, B> FinalReduceWorker<A, B> {
    pub fn new(config: ReducerConfig, bus: B, shutdown_rx: ShutdownRx) -> Self {
        Self {
            config,
            bus,
            shutdown_rx,
            _aggregate: PhantomData,
        }
    }
}

impl<A, B> FinalReduceWorker<A, B>
where
    A: QueryAggregate,
    B: MessageBus + Send + Sync + 'static,
{
    pub async fn start(self) -> ReelResult<WorkerHandle> {
        self.config.validate()?;

        let query = A::QUERY;
        if self.config.query != query {
            bail!(
                ErrorKind::ConfigError,
                "Final reducer configured for another query",
                format!("aggregate computes {query}, configuration names {}", self.config.query)
            );
        }

        info!(%query, shards = self.config.shards, "starting final reducer");

        let queues = self.config.queues();
        let subscription = self.bus.subscribe(&queues.to_final_reduce).await?;

        let worker = format!("{query}-final-reducer");
        let span = tracing::info_span!("final_reducer", %query);
        let final_loop = FinalReduceLoop {
            worker: worker.clone(),
            aggregator: ShardAggregator::<A>::new(&self.config),
            bus: self.bus,
            results_queue: queues.results,
            undelivered: HashMap::new(),
        };
        let shutdown_rx = self.shutdown_rx;

        let task = async move {
            final_loop.run(subscription, shutdown_rx).await?;

            info!("final reducer completed successfully");

            Ok(())
        }
        .instrument(span.or_current());

        Ok(WorkerHandle::new(worker, tokio::spawn(task)))
    }
}

struct FinalReduceLoop<A, B> {
    worker: String,
    aggregator: ShardAggregator<A>,
    bus: B,
    results_queue: String,
    /// Final results whose publish failed, kept until the redelivered batch lets us retry.
    undelivered: HashMap<ClientId, Bytes>,
}

impl<A, B> FinalReduceLoop<A, B>
where
    A: QueryAggregate,
    B: MessageBus + Send + Sync,
{
    async fn run(
        mut self,
        mut subscription: B::Subscription,
        mut shutdown_rx: ShutdownRx,
    ) -> ReelResult<()> {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!(
                        live_sessions = self.aggregator.live_sessions(),
                        "shutting down final reducer"
                    );
                    return Ok(());
                }

                delivery = subscription.next_delivery() => {
                    let Some(delivery) = delivery else {
                        info!(queue = subscription.queue(), "inbound queue closed");
                        return Ok(());
                    };

                    self.handle(delivery).await?;
                }
            }
        }
    }

    async fn handle(
        &mut self,
        delivery: <B::Subscription as Subscription>::Delivery,
    ) -> ReelResult<()> {
        let batch = match Batch::<A::Item>::decode(delivery.payload()) {
            Ok(batch) => batch,
            Err(err) => return reject_undecodable(&self.worker, "final", delivery, err).await,
        };
        counter!(
            REEL_REDUCER_BATCHES_TOTAL,
            WORKER_LABEL => self.worker.clone(),
            QUERY_LABEL => A::QUERY.to_string()
        )
        .increment(1);

        let client_id = batch.client_id().clone();

        if let Some(payload) = self.undelivered.get(&client_id).cloned() {
            return self.publish_result(delivery, client_id, payload).await;
        }

        let result = match self.aggregator.apply(batch) {
            Ok(AggregationOutcome::Pending) => return delivery.ack().await,
            Ok(AggregationOutcome::Discarded) => {
                info!(client_id = %client_id, "client cleanup, discarded aggregation");
                return delivery.ack().await;
            }
            Ok(AggregationOutcome::Late) => {
                return drop_late(&self.worker, "final", &client_id, delivery).await;
            }
            Ok(AggregationOutcome::Completed(result)) => result,
            Err(err) if err.kind() == ErrorKind::SessionLimitExceeded => {
                return reject_refused(&self.worker, "final", delivery, err).await;
            }
            Err(err) => {
                warn!(client_id = %client_id, error = %err, "ignoring inconsistent partial result");
                return delivery.ack().await;
            }
        };

        debug!(client_id = %client_id, ?result, "query complete");

        let payload = encode_json(&QueryResult {
            client_id: client_id.clone(),
            query_id: A::QUERY.id(),
            last: true,
            items: result,
        })?;

        self.publish_result(delivery, client_id, payload).await
    }

    async fn publish_result(
        &mut self,
        delivery: <B::Subscription as Subscription>::Delivery,
        client_id: ClientId,
        payload: Bytes,
    ) -> ReelResult<()> {
        if let Err(err) = self
            .bus
            .publish(&self.results_queue, payload.clone())
            .await
        {
            self.undelivered.insert(client_id, payload);
            return reject_for_redelivery(&self.worker, "final", delivery, err).await;
        }

        self.undelivered.remove(&client_id);
        counter!(
            REEL_FINAL_RESULTS_TOTAL,
            WORKER_LABEL => self.worker.clone(),
            QUERY_LABEL => A::QUERY.to_string()
        )
        .increment(1);
        info!(client_id = %client_id, queue = %self.results_queue, "published final result");

        delivery.ack().await
    }
}
