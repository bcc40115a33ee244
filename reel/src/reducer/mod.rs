//! Partial and final reduction of the query results.
//!
//! Every query is reduced in two steps: each upstream shard runs a stateless
//! [`partial::PartialReducer`] over its batches, then one final reducer merges the partial results
//! of all shards with a [`shard::ShardAggregator`] and emits the answer once every shard's stream
//! is complete.

pub mod aggregate;
pub mod finalize;
pub mod partial;
pub mod shard;

pub use aggregate::{
    BestAndWorstAggregate, QueryAggregate, SentimentProfitAggregate, TopActorsAggregate,
    TopCountriesAggregate,
};
pub use partial::{
    ActorAppearancesReducer, CountryBudgetReducer, MovieRatingReducer, PartialReducer,
    SentimentProfitReducer,
};
pub use shard::{AggregationOutcome, ShardAggregator};
