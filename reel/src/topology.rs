//! In-process deployment of the join and reduction stages.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use reel_config::shared::{QueryKind, TopologyConfig};
use tracing::{error, info};

use crate::bus::MessageBus;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::ReelResult;
use crate::reducer::{
    ActorAppearancesReducer, BestAndWorstAggregate, MovieRatingReducer, TopActorsAggregate,
};
use crate::routing::ShardRouter;
use crate::workers::{FinalReduceWorker, JoinWorker, PartialReduceWorker, WorkerHandle};

#[derive(Debug)]
enum TopologyState {
    NotStarted,
    Started { workers: Vec<WorkerHandle> },
}

/// Runs every joiner shard together with the reducers of queries 3 and 4 as tasks of one
/// process, wired through a shared [`MessageBus`].
#[derive(Debug)]
pub struct LocalTopology<B> {
    config: TopologyConfig,
    bus: B,
    state: TopologyState,
    shutdown_tx: ShutdownTx,
}

impl<B> LocalTopology<B>
where
    B: MessageBus + Clone + Send + Sync + 'static,
{
    pub fn new(config: TopologyConfig, bus: B) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config,
            bus,
            state: TopologyState::NotStarted,
            shutdown_tx,
        }
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Returns a router publishing the input relations to the joiner shards of this topology.
    pub fn router(&self) -> ShardRouter<B> {
        ShardRouter::new(self.bus.clone(), self.config.joiner_shards)
    }

    /// Starts the workers downstream first, so that every queue has its consumer before anything
    /// is published to it.
    pub async fn start(&mut self) -> ReelResult<()> {
        self.config.validate()?;

        info!(
            joiner_shards = self.config.joiner_shards,
            "starting local topology"
        );

        let mut workers = Vec::new();

        let best_and_worst = FinalReduceWorker::<BestAndWorstAggregate, B>::new(
            self.config.reducer(QueryKind::BestAndWorstMovies),
            self.bus.clone(),
            self.shutdown_tx.subscribe(),
        );
        workers.push(best_and_worst.start().await?);

        let top_actors = FinalReduceWorker::<TopActorsAggregate, B>::new(
            self.config.reducer(QueryKind::TopActors),
            self.bus.clone(),
            self.shutdown_tx.subscribe(),
        );
        workers.push(top_actors.start().await?);

        // Every joiner publishes into the same `q{n}-to-reduce` queue, which has one consumer.
        let movie_ratings = PartialReduceWorker::new(
            MovieRatingReducer,
            0,
            self.bus.clone(),
            self.shutdown_tx.subscribe(),
        );
        workers.push(movie_ratings.start().await?);

        let actor_appearances = PartialReduceWorker::new(
            ActorAppearancesReducer,
            0,
            self.bus.clone(),
            self.shutdown_tx.subscribe(),
        );
        workers.push(actor_appearances.start().await?);

        for joiner_config in self.config.joiners() {
            let joiner = JoinWorker::new(
                joiner_config,
                self.bus.clone(),
                self.shutdown_tx.subscribe(),
            );
            workers.push(joiner.start().await?);
        }

        self.state = TopologyState::Started { workers };

        Ok(())
    }

    /// Waits for every worker, returning all their errors at once.
    ///
    /// The first failing worker triggers the shutdown of the others, since the stages depend on
    /// each other.
    pub async fn wait(self) -> ReelResult<()> {
        let TopologyState::Started { workers } = self.state else {
            info!("topology was not started, nothing to wait for");

            return Ok(());
        };

        info!(workers = workers.len(), "waiting for workers to complete");

        let mut running: FuturesUnordered<_> = workers
            .into_iter()
            .map(|worker| async move {
                let name = worker.name().to_string();
                (name, worker.wait().await)
            })
            .collect();

        let mut errors = vec![];
        while let Some((name, result)) = running.next().await {
            if let Err(err) = result {
                error!(worker = %name, error = %err, "worker completed with an error");
                errors.push(err);

                // Fails only if every worker already stopped.
                let _ = self.shutdown_tx.shutdown();
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        info!("trying to shut down the topology");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the topology: {}", err);
            return;
        }

        info!("shut down signal successfully sent to all workers");
    }

    pub async fn shutdown_and_wait(self) -> ReelResult<()> {
        self.shutdown();
        self.wait().await
    }
}
