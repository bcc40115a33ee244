//! Distribution of the input relations across joiner shards.
//!
//! Movies are broadcast so that every shard holds the complete build side. Reviews and credits
//! are partitioned by movie id; every shard receives a batch for every input batch, possibly
//! empty, carrying the original header. Each shard therefore observes the full stream weight and
//! its own terminal marker, and a reducer downstream of `n` shards expects `n` terminal markers.

use reel_config::shared::JoinerQueues;
use serde::Serialize;

use crate::bus::MessageBus;
use crate::error::ReelResult;
use crate::types::{Batch, Credit, Movie, Review};

/// Returns the shard owning `movie_id`, using the 32-bit FNV-1a hash of the id.
pub fn shard_for(movie_id: &str, shards: u16) -> u16 {
    const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let hash = movie_id.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    });

    (hash % u32::from(shards.max(1))) as u16
}

/// Splits a batch into one batch per shard, keeping the original header on each of them.
pub fn partition<T: Clone>(
    batch: &Batch<T>,
    shards: u16,
    movie_id: impl Fn(&T) -> &str,
) -> Vec<Batch<T>> {
    let mut parts: Vec<Vec<T>> = vec![Vec::new(); usize::from(shards)];
    for item in &batch.data {
        let shard = shard_for(movie_id(item), shards);
        parts[usize::from(shard)].push(item.clone());
    }

    parts.into_iter().map(|data| batch.with_data(data)).collect()
}

/// Publishes the input relations to the joiner shards.
#[derive(Debug, Clone)]
pub struct ShardRouter<B> {
    bus: B,
    shards: Vec<JoinerQueues>,
}

impl<B> ShardRouter<B>
where
    B: MessageBus,
{
    pub fn new(bus: B, shards: u16) -> Self {
        Self {
            bus,
            shards: (0..shards).map(JoinerQueues::for_shard).collect(),
        }
    }

    /// Broadcasts a movie batch to every shard.
    pub async fn route_movies(&self, batch: &Batch<Movie>) -> ReelResult<()> {
        let payload = batch.encode()?;
        for queues in &self.shards {
            self.bus.publish(&queues.movies, payload.clone()).await?;
        }

        Ok(())
    }

    pub async fn route_reviews(&self, batch: &Batch<Review>) -> ReelResult<()> {
        let parts = partition(batch, self.shard_count(), |review| &review.movie_id);
        self.publish_parts(parts, |queues| &queues.reviews).await
    }

    pub async fn route_credits(&self, batch: &Batch<Credit>) -> ReelResult<()> {
        let parts = partition(batch, self.shard_count(), |credit| &credit.movie_id);
        self.publish_parts(parts, |queues| &queues.credits).await
    }

    fn shard_count(&self) -> u16 {
        u16::try_from(self.shards.len()).unwrap_or(u16::MAX)
    }

    async fn publish_parts<T: Serialize>(
        &self,
        parts: Vec<Batch<T>>,
        queue: impl Fn(&JoinerQueues) -> &String,
    ) -> ReelResult<()> {
        for (queues, part) in self.shards.iter().zip(parts) {
            self.bus.publish(queue(queues), part.encode()?).await?;
        }

        Ok(())
    }
}
