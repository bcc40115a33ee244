use reel_config::shared::JoinerConfig;
use tracing::{Instrument, info};

use crate::bus::MessageBus;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::ReelResult;
use crate::joiner::JoinLoop;
use crate::workers::base::WorkerHandle;

/// Worker running the join loop of one joiner shard.
#[derive(Debug)]
pub struct JoinWorker<B> {
    config: JoinerConfig,
    bus: B,
    shutdown_rx: ShutdownRx,
}

impl<B> JoinWorker<B> {
    pub fn new(config: JoinerConfig, bus: B, shutdown_rx: ShutdownRx) -> Self {
        Self {
            config,
            bus,
            shutdown_rx,
        }
    }
}

impl<B> JoinWorker<B>
where
    B: MessageBus + Send + Sync + 'static,
{
    /// Subscribes to the inbound queues of the shard and spawns its join loop.
    ///
    /// Subscriptions are established before this returns, so batches published afterwards are
    /// never missed.
    pub async fn start(self) -> ReelResult<WorkerHandle> {
        self.config.validate()?;

        let shard_id = self.config.shard_id;
        info!(shard_id, shards = self.config.shards, "starting joiner");

        let queues = self.config.queues();
        let movies = self.bus.subscribe(&queues.movies).await?;
        let reviews = self.bus.subscribe(&queues.reviews).await?;
        let credits = self.bus.subscribe(&queues.credits).await?;

        let join_loop = JoinLoop::new(&self.config, self.bus);
        let shutdown_rx = self.shutdown_rx;

        let joiner_span = tracing::info_span!("joiner", shard_id);
        let joiner = async move {
            join_loop.run(movies, reviews, credits, shutdown_rx).await?;

            info!("joiner completed successfully");

            Ok(())
        }
        .instrument(joiner_span.or_current());

        Ok(WorkerHandle::new(
            format!("joiner-{shard_id}"),
            tokio::spawn(joiner),
        ))
    }
}
