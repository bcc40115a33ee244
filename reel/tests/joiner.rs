#![cfg(feature = "test-utils")]

use bytes::Bytes;
use reel::bus::MessageBus;
use reel::bus::memory::MemoryBus;
use reel::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use reel::test_utils::bus::{published_batches, wait_for_published};
use reel::test_utils::fixtures::{
    cleanup_payload, credit, data_payload, movie, review, terminal_payload,
};
use reel::types::{Batch, BatchKind, Credit, Movie, MovieReview, Review};
use reel::workers::{JoinWorker, WorkerHandle};
use reel_config::shared::{JoinerConfig, SessionLimitsConfig};
use reel_telemetry::tracing::init_test_tracing;

const MOVIES: &str = "movies-to-join-0";
const REVIEWS: &str = "reviews-to-join-0";
const CREDITS: &str = "credits-to-join-0";
const JOINED_REVIEWS: &str = "q3-to-reduce";
const FILTERED_CREDITS: &str = "q4-to-reduce";

async fn start_joiner(bus: &MemoryBus, limits: SessionLimitsConfig) -> (ShutdownTx, WorkerHandle) {
    let (shutdown_tx, _) = create_shutdown_channel();
    let config = JoinerConfig {
        shard_id: 0,
        shards: 1,
        limits,
        replay_retry_delay_ms: 10,
    };

    let handle = JoinWorker::new(config, bus.clone(), shutdown_tx.subscribe())
        .start()
        .await
        .unwrap();

    (shutdown_tx, handle)
}

async fn publish(bus: &MemoryBus, queue: &str, payload: Bytes) {
    bus.publish(queue, payload).await.unwrap();
}

async fn publish_movies(bus: &MemoryBus, client_id: &str, movies: Vec<Movie>) {
    let total = movies.len() as u32;
    publish(bus, MOVIES, data_payload(client_id, movies)).await;
    publish(bus, MOVIES, terminal_payload::<Movie>(client_id, total)).await;
}

async fn publish_reviews(bus: &MemoryBus, client_id: &str, reviews: Vec<Review>) {
    let total = reviews.len() as u32;
    publish(bus, REVIEWS, data_payload(client_id, reviews)).await;
    publish(bus, REVIEWS, terminal_payload::<Review>(client_id, total)).await;
}

async fn publish_credits(bus: &MemoryBus, client_id: &str, credits: Vec<Credit>) {
    let total = credits.len() as u32;
    publish(bus, CREDITS, data_payload(client_id, credits)).await;
    publish(bus, CREDITS, terminal_payload::<Credit>(client_id, total)).await;
}

fn of_client<'a, T>(batches: &'a [Batch<T>], client_id: &str) -> Vec<&'a Batch<T>> {
    batches
        .iter()
        .filter(|batch| batch.client_id().as_str() == client_id)
        .collect()
}

async fn stop(shutdown_tx: ShutdownTx, handle: WorkerHandle) {
    shutdown_tx.shutdown().unwrap();
    handle.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn live_probes_are_joined_and_forwarded_with_their_weight() {
    init_test_tracing();

    let bus = MemoryBus::with_history();
    let (shutdown_tx, handle) = start_joiner(&bus, SessionLimitsConfig::default()).await;

    publish_movies(&bus, "a", vec![movie("1", "Toy Story"), movie("2", "Heat")]).await;
    publish_reviews(
        &bus,
        "a",
        vec![review("r1", "1", 4.0), review("r2", "9", 2.0)],
    )
    .await;
    publish(
        &bus,
        CREDITS,
        data_payload("a", vec![credit("2", &["Pacino"]), credit("7", &["Nobody"])]),
    )
    .await;
    publish(&bus, CREDITS, terminal_payload::<Credit>("a", 2)).await;

    wait_for_published(&bus, JOINED_REVIEWS, 2).await;
    wait_for_published(&bus, FILTERED_CREDITS, 2).await;

    let joined = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    assert_eq!(joined[0].header.weight, 2);
    assert_eq!(
        joined[0].data,
        vec![MovieReview {
            movie_id: "1".to_string(),
            title: "Toy Story".to_string(),
            rating: 4.0,
        }]
    );
    assert_eq!(joined[1].kind(), BatchKind::Terminal { total: 2 });

    let filtered = published_batches::<Credit>(&bus, FILTERED_CREDITS).await;
    assert_eq!(filtered[0].header.weight, 2);
    assert_eq!(filtered[0].data, vec![credit("2", &["Pacino"])]);
    assert_eq!(filtered[1].kind(), BatchKind::Terminal { total: 2 });

    stop(shutdown_tx, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn probes_arriving_before_movies_complete_are_replayed() {
    init_test_tracing();

    let bus = MemoryBus::with_history();
    let (shutdown_tx, handle) = start_joiner(&bus, SessionLimitsConfig::default()).await;

    // Client `a` completes its movies and opens the probe queues, client `b` does not yet.
    publish_movies(&bus, "a", vec![movie("1", "Toy Story")]).await;
    publish(&bus, MOVIES, data_payload("b", vec![movie("5", "Alien")])).await;
    publish_reviews(&bus, "b", vec![review("r1", "5", 5.0)]).await;
    publish_reviews(&bus, "a", vec![review("r2", "1", 3.0)]).await;

    // Once `a` is joined, the reviews of `b` queued before it were buffered.
    wait_for_published(&bus, JOINED_REVIEWS, 2).await;
    let joined = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    assert!(joined.iter().all(|batch| batch.client_id().as_str() == "a"));

    publish(&bus, MOVIES, terminal_payload::<Movie>("b", 1)).await;
    wait_for_published(&bus, JOINED_REVIEWS, 4).await;

    let joined = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    let replayed: Vec<_> = joined
        .iter()
        .filter(|batch| batch.client_id().as_str() == "b")
        .collect();
    assert_eq!(replayed.len(), 2);
    assert_eq!(replayed[0].header.weight, 1);
    assert_eq!(replayed[0].data[0].title, "Alien");
    assert_eq!(replayed[1].kind(), BatchKind::Terminal { total: 1 });

    stop(shutdown_tx, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_publish_is_retried_through_redelivery() {
    init_test_tracing();

    let bus = MemoryBus::with_history();
    bus.fail_next_publishes(JOINED_REVIEWS, 1).await;
    let (shutdown_tx, handle) = start_joiner(&bus, SessionLimitsConfig::default()).await;

    publish_movies(&bus, "a", vec![movie("1", "Toy Story")]).await;
    publish_reviews(&bus, "a", vec![review("r1", "1", 4.0)]).await;

    wait_for_published(&bus, JOINED_REVIEWS, 2).await;

    let joined = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    assert_eq!(joined.len(), 2);
    assert_eq!(joined[0].data.len(), 1);
    assert_eq!(joined[1].kind(), BatchKind::Terminal { total: 1 });
    assert_eq!(bus.rejected(REVIEWS).await, 1);

    stop(shutdown_tx, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_review_delivery_is_joined_twice() {
    init_test_tracing();

    let bus = MemoryBus::with_history();
    let (shutdown_tx, handle) = start_joiner(&bus, SessionLimitsConfig::default()).await;

    publish_movies(&bus, "a", vec![movie("1", "Toy Story")]).await;
    let reviews = data_payload("a", vec![review("r1", "1", 4.0)]);
    publish(&bus, REVIEWS, reviews.clone()).await;
    publish(&bus, REVIEWS, reviews).await;
    publish(&bus, REVIEWS, terminal_payload::<Review>("a", 1)).await;

    wait_for_published(&bus, JOINED_REVIEWS, 3).await;

    // Deliveries are not deduplicated: a redelivered batch counts its weight again.
    let joined = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    assert_eq!(joined[0], joined[1]);
    assert_eq!(joined[2].kind(), BatchKind::Terminal { total: 1 });

    stop(shutdown_tx, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_discards_the_session_and_is_forwarded() {
    init_test_tracing();

    let bus = MemoryBus::with_history();
    let (shutdown_tx, handle) = start_joiner(&bus, SessionLimitsConfig::default()).await;

    publish_movies(&bus, "b", vec![movie("1", "Toy Story")]).await;
    publish(&bus, MOVIES, data_payload("a", vec![movie("2", "Heat")])).await;
    publish(&bus, REVIEWS, cleanup_payload::<Review>("a")).await;

    wait_for_published(&bus, JOINED_REVIEWS, 1).await;

    let forwarded = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    assert_eq!(forwarded[0].client_id().as_str(), "a");
    assert_eq!(forwarded[0].kind(), BatchKind::Cleanup);

    // Batches of the discarded client are dropped from now on.
    publish(&bus, MOVIES, terminal_payload::<Movie>("a", 1)).await;
    publish_reviews(&bus, "a", vec![review("r1", "2", 1.0)]).await;
    publish_reviews(&bus, "b", vec![review("r2", "1", 2.0)]).await;

    wait_for_published(&bus, JOINED_REVIEWS, 3).await;

    let joined = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    assert_eq!(joined.len(), 3);
    assert!(
        joined[1..]
            .iter()
            .all(|batch| batch.client_id().as_str() == "b")
    );

    stop(shutdown_tx, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_buffer_overflow_aborts_the_client_downstream() {
    init_test_tracing();

    let bus = MemoryBus::with_history();
    let limits = SessionLimitsConfig {
        max_pending_batches: 1,
        ..Default::default()
    };
    let (shutdown_tx, handle) = start_joiner(&bus, limits).await;

    publish_movies(&bus, "b", vec![movie("1", "Toy Story")]).await;
    publish_movies(&bus, "c", vec![movie("1", "Toy Story")]).await;
    publish(&bus, MOVIES, data_payload("a", vec![movie("1", "Toy Story")])).await;
    publish(&bus, REVIEWS, data_payload("a", vec![review("r1", "1", 1.0)])).await;
    publish(&bus, REVIEWS, data_payload("a", vec![review("r2", "1", 2.0)])).await;
    publish_reviews(&bus, "b", vec![review("r3", "1", 3.0)]).await;

    // The overflow of `a` forwards a cleanup marker on both outputs.
    wait_for_published(&bus, JOINED_REVIEWS, 3).await;
    wait_for_published(&bus, FILTERED_CREDITS, 1).await;

    publish(&bus, MOVIES, terminal_payload::<Movie>("a", 1)).await;
    publish_reviews(&bus, "c", vec![review("r4", "1", 4.0)]).await;

    wait_for_published(&bus, JOINED_REVIEWS, 5).await;

    let joined = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    assert_eq!(joined.len(), 5);
    let aborted = of_client(&joined, "a");
    assert_eq!(aborted.len(), 1);
    assert_eq!(aborted[0].kind(), BatchKind::Cleanup);

    let filtered = published_batches::<Credit>(&bus, FILTERED_CREDITS).await;
    assert_eq!(filtered[0].client_id().as_str(), "a");
    assert_eq!(filtered[0].kind(), BatchKind::Cleanup);

    stop(shutdown_tx, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn client_refused_by_session_limit_is_dropped_for_good() {
    init_test_tracing();

    let bus = MemoryBus::with_history();
    let limits = SessionLimitsConfig {
        max_sessions: 1,
        ..Default::default()
    };
    let (shutdown_tx, handle) = start_joiner(&bus, limits).await;

    // `b` shows up while `a` holds the only session.
    publish(&bus, MOVIES, data_payload("a", vec![movie("1", "Toy Story")])).await;
    publish(&bus, MOVIES, data_payload("b", vec![movie("2", "Heat")])).await;
    publish(&bus, MOVIES, terminal_payload::<Movie>("a", 1)).await;
    publish_reviews(&bus, "a", vec![review("r1", "1", 4.0)]).await;
    publish_credits(&bus, "a", vec![credit("1", &["Hanks"])]).await;

    // Cleanup of `b` plus the data and terminal batches of `a` on each output.
    wait_for_published(&bus, JOINED_REVIEWS, 3).await;
    wait_for_published(&bus, FILTERED_CREDITS, 3).await;

    // `a` is done and its slot is free, but `b` already lost a batch.
    publish(&bus, MOVIES, terminal_payload::<Movie>("b", 1)).await;
    publish_movies(&bus, "c", vec![movie("3", "Alien")]).await;
    publish_reviews(&bus, "b", vec![review("r2", "2", 1.0)]).await;
    publish_reviews(&bus, "c", vec![review("r3", "3", 2.0)]).await;

    wait_for_published(&bus, JOINED_REVIEWS, 5).await;

    let joined = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    let refused = of_client(&joined, "b");
    assert_eq!(refused.len(), 1);
    assert_eq!(refused[0].kind(), BatchKind::Cleanup);
    assert_eq!(of_client(&joined, "c").len(), 2);

    let filtered = published_batches::<Credit>(&bus, FILTERED_CREDITS).await;
    assert_eq!(of_client(&filtered, "b")[0].kind(), BatchKind::Cleanup);
    assert_eq!(bus.rejected(MOVIES).await, 1);

    stop(shutdown_tx, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_live_terminal_is_not_forwarded() {
    init_test_tracing();

    let bus = MemoryBus::with_history();
    let (shutdown_tx, handle) = start_joiner(&bus, SessionLimitsConfig::default()).await;

    publish_movies(&bus, "a", vec![movie("1", "Toy Story")]).await;
    publish_movies(&bus, "b", vec![movie("1", "Toy Story")]).await;
    publish(&bus, REVIEWS, data_payload("a", vec![review("r1", "1", 4.0)])).await;
    publish(&bus, REVIEWS, data_payload("a", vec![review("r2", "1", 2.0)])).await;
    publish(&bus, REVIEWS, terminal_payload::<Review>("a", 2)).await;
    publish(&bus, REVIEWS, terminal_payload::<Review>("a", 1)).await;
    publish_reviews(&bus, "b", vec![review("r3", "1", 3.0)]).await;

    // Once the batches of `b` are out, the duplicate terminal of `a` was handled.
    wait_for_published(&bus, JOINED_REVIEWS, 5).await;

    let joined = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    let terminals: Vec<_> = of_client(&joined, "a")
        .into_iter()
        .filter_map(|batch| match batch.kind() {
            BatchKind::Terminal { total } => Some(total),
            _ => None,
        })
        .collect();
    assert_eq!(terminals, vec![2]);
    assert_eq!(joined.len(), 5);

    stop(shutdown_tx, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_replay_is_retried_without_stopping_the_shard() {
    init_test_tracing();

    let bus = MemoryBus::with_history();
    let (shutdown_tx, handle) = start_joiner(&bus, SessionLimitsConfig::default()).await;

    publish_movies(&bus, "a", vec![movie("1", "Toy Story")]).await;
    publish(&bus, MOVIES, data_payload("b", vec![movie("2", "Heat")])).await;
    publish(&bus, REVIEWS, data_payload("b", vec![review("r1", "2", 5.0)])).await;
    publish(&bus, REVIEWS, data_payload("a", vec![review("r2", "1", 3.0)])).await;

    // The review of `b` queued before the one of `a` is now buffered.
    wait_for_published(&bus, JOINED_REVIEWS, 1).await;

    bus.fail_next_publishes(JOINED_REVIEWS, 1).await;
    publish(&bus, MOVIES, terminal_payload::<Movie>("b", 1)).await;
    publish(&bus, REVIEWS, terminal_payload::<Review>("a", 1)).await;

    wait_for_published(&bus, JOINED_REVIEWS, 3).await;

    let joined = published_batches::<MovieReview>(&bus, JOINED_REVIEWS).await;
    let replayed = of_client(&joined, "b");
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].header.weight, 1);
    assert_eq!(replayed[0].data[0].title, "Heat");
    assert_eq!(
        of_client(&joined, "a")[1].kind(),
        BatchKind::Terminal { total: 1 }
    );

    stop(shutdown_tx, handle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_batches_are_rejected_without_requeue() {
    init_test_tracing();

    let bus = MemoryBus::with_history();
    let (shutdown_tx, handle) = start_joiner(&bus, SessionLimitsConfig::default()).await;

    publish(&bus, MOVIES, Bytes::from_static(b"not json")).await;
    publish_movies(&bus, "a", vec![movie("1", "Toy Story")]).await;
    publish_reviews(&bus, "a", vec![review("r1", "1", 4.0)]).await;

    wait_for_published(&bus, JOINED_REVIEWS, 2).await;

    assert_eq!(bus.rejected(MOVIES).await, 1);
    assert_eq!(bus.acked(MOVIES).await, 2);

    stop(shutdown_tx, handle).await;
}
