#![cfg(feature = "test-utils")]

use reel::bus::memory::MemoryBus;
use reel::ingest::StreamWriter;
use reel::routing::ShardRouter;
use reel::test_utils::bus::{decode_all, wait_for_published};
use reel::test_utils::fixtures::{client, credit, movie, review};
use reel::topology::LocalTopology;
use reel::types::{BestAndWorstMovies, QueryResult, TopActors};
use reel_config::shared::{BatchConfig, SessionLimitsConfig, TopologyConfig};
use reel_telemetry::tracing::init_test_tracing;

fn topology_config(joiner_shards: u16) -> TopologyConfig {
    TopologyConfig {
        joiner_shards,
        batch: BatchConfig { max_size: 2 },
        limits: SessionLimitsConfig::default(),
    }
}

async fn stream_client(router: &ShardRouter<MemoryBus>, config: &TopologyConfig, client_id: &str) {
    let writer = StreamWriter::new(client(client_id), &config.batch);

    let movies = vec![
        movie("1", "Toy Story"),
        movie("2", "Heat"),
        movie("3", "Alien"),
    ];
    let reviews = vec![
        review("r1", "1", 5.0),
        review("r2", "1", 4.0),
        review("r3", "2", 1.0),
        review("r4", "99", 3.0),
    ];
    let credits = vec![
        credit("1", &["Hanks", "Allen"]),
        credit("2", &["Pacino", "De Niro"]),
        credit("3", &["Hanks"]),
        credit("99", &["Ghost"]),
    ];

    for batch in writer.batches(&movies).unwrap() {
        router.route_movies(&batch).await.unwrap();
    }
    for batch in writer.batches(&reviews).unwrap() {
        router.route_reviews(&batch).await.unwrap();
    }
    for batch in writer.batches(&credits).unwrap() {
        router.route_credits(&batch).await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sharded_topology_answers_queries_for_every_client() {
    init_test_tracing();

    let config = topology_config(3);
    let bus = MemoryBus::with_history();
    let mut topology = LocalTopology::new(config.clone(), bus.clone());
    topology.start().await.unwrap();

    let router = topology.router();
    stream_client(&router, &config, "a").await;
    stream_client(&router, &config, "b").await;

    wait_for_published(&bus, "q3-results", 2).await;
    wait_for_published(&bus, "q4-results", 2).await;

    let best_and_worst = decode_all::<QueryResult<BestAndWorstMovies>>(&bus, "q3-results").await;
    for result in &best_and_worst {
        assert!(result.last);
        assert_eq!(result.query_id, 3);

        let best = result.items.best_movie.as_ref().unwrap();
        assert_eq!((best.id.as_str(), best.rating), ("1", 4.5));
        let worst = result.items.worst_movie.as_ref().unwrap();
        assert_eq!((worst.id.as_str(), worst.rating), ("2", 1.0));
    }

    let top_actors = decode_all::<QueryResult<TopActors>>(&bus, "q4-results").await;
    for result in &top_actors {
        let leaders: Vec<_> = result.items.top_actors[..4]
            .iter()
            .map(|actor| (actor.actor_id.as_str(), actor.movies_amount))
            .collect();
        assert_eq!(
            leaders,
            vec![("Hanks", 2), ("Allen", 1), ("De Niro", 1), ("Pacino", 1)]
        );
        assert_eq!(result.items.top_actors.len(), 10);
    }

    let mut clients: Vec<_> = best_and_worst
        .iter()
        .map(|result| result.client_id.as_str().to_string())
        .collect();
    clients.sort();
    assert_eq!(clients, vec!["a", "b"]);

    topology.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_configuration_prevents_start() {
    init_test_tracing();

    let mut topology = LocalTopology::new(topology_config(0), MemoryBus::new());

    assert!(topology.start().await.is_err());
    topology.wait().await.unwrap();
}
