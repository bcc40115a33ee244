use std::collections::HashMap;

use reel_config::shared::ReducerConfig;

use crate::bail;
use crate::clients::FinishedClients;
use crate::completion::{Progress, ShardCompletionTracker};
use crate::error::{ErrorKind, ReelResult};
use crate::reducer::aggregate::QueryAggregate;
use crate::types::{Batch, BatchKind, ClientId};

/// Effect of a partial result batch on the aggregator.
#[derive(Debug, PartialEq)]
pub enum AggregationOutcome<O> {
    /// The client still expects more partial results.
    Pending,
    /// The batch completed the client; carries the final result.
    Completed(O),
    /// A cleanup marker discarded the state of the client.
    Discarded,
    /// The client already completed or was discarded; the batch was ignored.
    Late,
}

#[derive(Debug)]
struct AggregationSession<A> {
    aggregate: A,
    tracker: ShardCompletionTracker,
}

/// Merges the partial results of every upstream shard into one final result per client.
///
/// Each client owns its own aggregate and completion tracker, both dropped as soon as the final
/// result is produced, so sequential and concurrent clients never share state.
#[derive(Debug)]
pub struct ShardAggregator<A> {
    shards: u16,
    max_sessions: usize,
    sessions: HashMap<ClientId, AggregationSession<A>>,
    finished: FinishedClients,
}

impl<A> ShardAggregator<A>
where
    A: QueryAggregate,
{
    pub fn new(config: &ReducerConfig) -> Self {
        Self {
            shards: config.shards,
            max_sessions: config.limits.max_sessions,
            sessions: HashMap::new(),
            finished: FinishedClients::new(config.limits.finished_clients_memory),
        }
    }

    /// Applies one partial result batch.
    ///
    /// Batches inconsistent with the completion protocol are rejected before any item is
    /// merged. A client refused by the session limit is remembered as finished.
    pub fn apply(&mut self, batch: Batch<A::Item>) -> ReelResult<AggregationOutcome<A::Output>> {
        let client_id = batch.client_id().clone();

        if batch.kind() == BatchKind::Cleanup {
            self.sessions.remove(&client_id);
            self.finished.insert(client_id);
            return Ok(AggregationOutcome::Discarded);
        }

        if self.finished.contains(&client_id) {
            return Ok(AggregationOutcome::Late);
        }

        if !self.sessions.contains_key(&client_id) && self.sessions.len() >= self.max_sessions {
            // The refused batch is lost, so the client could never complete. Later batches of
            // it are dropped as late instead of opening a session.
            self.finished.insert(client_id.clone());
            bail!(
                ErrorKind::SessionLimitExceeded,
                "Too many live aggregation sessions",
                format!(
                    "refusing client {client_id}, {} sessions are live",
                    self.sessions.len()
                )
            );
        }

        let shards = self.shards;
        let session = self
            .sessions
            .entry(client_id.clone())
            .or_insert_with(|| AggregationSession {
                aggregate: A::default(),
                tracker: ShardCompletionTracker::new(shards),
            });

        let progress = session.tracker.register(&batch.header)?;
        for item in batch.data {
            session.aggregate.merge(item);
        }

        if progress != Progress::Completed {
            return Ok(AggregationOutcome::Pending);
        }

        let Some(session) = self.sessions.remove(&client_id) else {
            bail!(
                ErrorKind::InvalidState,
                "Aggregation session vanished on completion",
                client_id.to_string()
            );
        };
        self.finished.insert(client_id);

        Ok(AggregationOutcome::Completed(session.aggregate.finalize()))
    }

    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use reel_config::shared::{QueryKind, SessionLimitsConfig};

    use super::*;
    use crate::reducer::aggregate::TopActorsAggregate;
    use crate::types::{ActorMoviesAmount, TopActors};

    fn aggregator(shards: u16) -> ShardAggregator<TopActorsAggregate> {
        limited_aggregator(shards, SessionLimitsConfig::default())
    }

    fn limited_aggregator(shards: u16, limits: SessionLimitsConfig) -> ShardAggregator<TopActorsAggregate> {
        ShardAggregator::new(&ReducerConfig {
            query: QueryKind::TopActors,
            shards,
            limits,
        })
    }

    fn appearances(client: &str, weight: u32, actor: &str, amount: u32) -> Batch<ActorMoviesAmount> {
        let mut batch = Batch::data(
            ClientId::new(client),
            vec![ActorMoviesAmount {
                actor_id: actor.to_string(),
                actor_name: actor.to_uppercase(),
                movies_amount: amount,
            }],
        );
        batch.header.weight = weight;
        batch
    }

    fn completed(outcome: AggregationOutcome<TopActors>) -> TopActors {
        match outcome {
            AggregationOutcome::Completed(result) => result,
            other => panic!("expected a completed aggregation, got {other:?}"),
        }
    }

    #[test]
    fn completes_after_every_shard_terminal() {
        let mut aggregator = aggregator(2);
        let client = ClientId::new("c1");

        assert_eq!(
            aggregator.apply(appearances("c1", 4, "a", 2)).unwrap(),
            AggregationOutcome::Pending
        );
        assert_eq!(
            aggregator.apply(Batch::terminal(client.clone(), 4)).unwrap(),
            AggregationOutcome::Pending
        );
        assert_eq!(
            aggregator.apply(appearances("c1", 4, "a", 1)).unwrap(),
            AggregationOutcome::Pending
        );

        let result = completed(aggregator.apply(Batch::terminal(client, 4)).unwrap());

        assert_eq!(result.top_actors[0].movies_amount, 3);
        assert_eq!(aggregator.live_sessions(), 0);
    }

    #[test]
    fn clients_are_aggregated_independently() {
        let mut aggregator = aggregator(1);

        aggregator.apply(appearances("c1", 1, "a", 5)).unwrap();
        aggregator.apply(appearances("c2", 1, "b", 7)).unwrap();
        let first = completed(aggregator.apply(Batch::terminal(ClientId::new("c1"), 1)).unwrap());
        let second = completed(aggregator.apply(Batch::terminal(ClientId::new("c2"), 1)).unwrap());

        assert!(first.top_actors.iter().all(|actor| actor.actor_id == "a"));
        assert!(second.top_actors.iter().all(|actor| actor.actor_id == "b"));
    }

    #[test]
    fn batches_after_completion_are_late() {
        let mut aggregator = aggregator(1);
        aggregator.apply(appearances("c1", 1, "a", 1)).unwrap();
        completed(aggregator.apply(Batch::terminal(ClientId::new("c1"), 1)).unwrap());

        let outcome = aggregator.apply(appearances("c1", 1, "a", 1)).unwrap();

        assert_eq!(outcome, AggregationOutcome::Late);
        assert_eq!(aggregator.live_sessions(), 0);
    }

    #[test]
    fn cleanup_discards_partial_state() {
        let mut aggregator = aggregator(1);
        aggregator.apply(appearances("c1", 1, "a", 1)).unwrap();

        let outcome = aggregator.apply(Batch::cleanup(ClientId::new("c1"))).unwrap();

        assert_eq!(outcome, AggregationOutcome::Discarded);
        assert_eq!(aggregator.live_sessions(), 0);
    }

    #[test]
    fn extra_terminal_is_rejected_without_merging() {
        let mut aggregator = aggregator(1);
        aggregator.apply(Batch::terminal(ClientId::new("c1"), 2)).unwrap();

        let err = aggregator
            .apply(Batch::terminal(ClientId::new("c1"), 2))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(aggregator.live_sessions(), 1);
    }

    #[test]
    fn refused_client_stays_refused_after_a_slot_frees() {
        let mut aggregator = limited_aggregator(
            1,
            SessionLimitsConfig {
                max_sessions: 1,
                ..Default::default()
            },
        );
        aggregator.apply(appearances("c1", 1, "a", 1)).unwrap();

        let err = aggregator.apply(appearances("c2", 1, "b", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionLimitExceeded);

        completed(aggregator.apply(Batch::terminal(ClientId::new("c1"), 1)).unwrap());

        assert_eq!(
            aggregator.apply(Batch::terminal(ClientId::new("c2"), 1)).unwrap(),
            AggregationOutcome::Late
        );
        assert_eq!(aggregator.live_sessions(), 0);
    }
}
