use std::path::Path;

use anyhow::Context;
use reel::bus::memory::MemoryBus;
use reel::bus::{Delivery, MessageBus, Subscription};
use reel::concurrency::shutdown::ShutdownRx;
use reel::ingest::StreamWriter;
use reel::routing::ShardRouter;
use reel::topology::LocalTopology;
use reel::types::{ClientId, Credit, Movie, QueryResult, Review};
use reel_config::shared::{BatchConfig, QueryKind, QueryQueues, WorkerConfig};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use uuid::Uuid;

/// The relations one client submits.
#[derive(Debug)]
pub struct ClientInput {
    client_id: ClientId,
    movies: Vec<Movie>,
    reviews: Vec<Review>,
    credits: Vec<Credit>,
}

impl ClientInput {
    pub fn read(
        movies: &Path,
        reviews: &Path,
        credits: &Path,
        client_id: Option<String>,
    ) -> anyhow::Result<Self> {
        let client_id = client_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Self {
            client_id: ClientId::new(client_id),
            movies: read_relation(movies)?,
            reviews: read_relation(reviews)?,
            credits: read_relation(credits)?,
        })
    }
}

fn read_relation<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let content =
        std::fs::read(path).with_context(|| format!("failed to read `{}`", path.display()))?;

    serde_json::from_slice(&content)
        .with_context(|| format!("`{}` is not a JSON array of the expected items", path.display()))
}

/// Runs the local topology for one client and prints its query results.
///
/// SIGINT and SIGTERM stop the topology before the results are in.
pub async fn run_local_topology(config: WorkerConfig, input: ClientInput) -> anyhow::Result<()> {
    let bus = MemoryBus::new();

    // Results are consumed here, so the queues need their consumer before anything completes.
    let mut best_and_worst = bus
        .subscribe(&QueryQueues::for_query(QueryKind::BestAndWorstMovies).results)
        .await?;
    let mut top_actors = bus
        .subscribe(&QueryQueues::for_query(QueryKind::TopActors).results)
        .await?;

    let mut topology = LocalTopology::new(config.topology.clone(), bus.clone());
    topology.start().await?;

    let shutdown_tx = topology.shutdown_tx();
    let mut shutdown_rx = shutdown_tx.subscribe();
    let shutdown_handle = tokio::spawn(async move {
        wait_for_signal().await;

        if let Err(e) = shutdown_tx.shutdown() {
            warn!(error = ?e, "failed to send shutdown signal");
        }
    });

    let outcome = async {
        stream_client(&topology.router(), &config.topology.batch, &input).await?;
        info!(client_id = %input.client_id, "client relations streamed, awaiting results");

        tokio::select! {
            results = collect_results(&input.client_id, &mut best_and_worst, &mut top_actors) => {
                results.map(Some)
            }
            _ = shutdown_signaled(&mut shutdown_rx) => Ok(None),
        }
    }
    .await;

    let stopped = topology.shutdown_and_wait().await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    let results = outcome?;
    stopped?;

    match results {
        Some(results) => {
            for result in results {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        None => info!("stopped before every query answered"),
    }

    Ok(())
}

async fn stream_client(
    router: &ShardRouter<MemoryBus>,
    batch: &BatchConfig,
    input: &ClientInput,
) -> anyhow::Result<()> {
    let writer = StreamWriter::new(input.client_id.clone(), batch);

    for batch in writer.batches(&input.movies)? {
        router.route_movies(&batch).await?;
    }
    for batch in writer.batches(&input.reviews)? {
        router.route_reviews(&batch).await?;
    }
    for batch in writer.batches(&input.credits)? {
        router.route_credits(&batch).await?;
    }

    Ok(())
}

/// Waits for the final result of the client on both result queues.
async fn collect_results<S>(
    client_id: &ClientId,
    best_and_worst: &mut S,
    top_actors: &mut S,
) -> anyhow::Result<Vec<QueryResult<Value>>>
where
    S: Subscription,
{
    let mut results = Vec::with_capacity(2);
    for subscription in [best_and_worst, top_actors] {
        results.push(next_result(client_id, subscription).await?);
    }

    Ok(results)
}

async fn next_result<S>(client_id: &ClientId, subscription: &mut S) -> anyhow::Result<QueryResult<Value>>
where
    S: Subscription,
{
    loop {
        let Some(delivery) = subscription.next_delivery().await else {
            anyhow::bail!("result queue `{}` closed", subscription.queue());
        };

        let result: QueryResult<Value> = serde_json::from_slice(delivery.payload())
            .with_context(|| format!("malformed result on `{}`", subscription.queue()))?;
        delivery.ack().await?;

        if &result.client_id == client_id && result.last {
            return Ok(result);
        }
    }
}

async fn shutdown_signaled(shutdown_rx: &mut ShutdownRx) {
    // A closed channel means the topology is gone, which also ends the wait.
    let _ = shutdown_rx.changed().await;
}

async fn wait_for_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!(error = %err, "failed to register SIGTERM handler, only listening for SIGINT");
            let _ = tokio::signal::ctrl_c().await;
            info!("sigint (ctrl+c) received, shutting down topology");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("sigint (ctrl+c) received, shutting down topology");
        }
        _ = sigterm.recv() => {
            info!("sigterm received, shutting down topology");
        }
    }
}
