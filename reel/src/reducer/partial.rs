//! Per-shard partial reductions.
//!
//! A partial reducer collapses the items of one batch into per-key accumulators. It keeps no
//! state across batches and the output batch keeps the header of its input, so the final
//! reducer accounts weight exactly as if it had seen the original items.

use std::collections::HashMap;

use reel_config::shared::QueryKind;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::bail;
use crate::error::{ErrorKind, ReelResult};
use crate::types::{
    ActorMoviesAmount, Country, CountryBudget, Credit, Movie, MovieAvgRating, MovieReview,
    MovieWithSentiment, Sentiment, SentimentProfitRatioAccumulator,
};

/// Stateless reduction of the items of one batch.
pub trait PartialReducer {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + 'static;

    /// The query this reducer contributes to.
    const QUERY: QueryKind;

    fn reduce(&self, items: Vec<Self::Input>) -> ReelResult<Vec<Self::Output>>;
}

/// Query 2: budget invested per production country.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountryBudgetReducer;

impl PartialReducer for CountryBudgetReducer {
    type Input = Movie;
    type Output = CountryBudget;

    const QUERY: QueryKind = QueryKind::TopCountries;

    /// Fails with [`ErrorKind::InvalidData`] when a movie has more than one production country,
    /// which the upstream filter is expected to exclude. Movies without a country are skipped.
    fn reduce(&self, items: Vec<Movie>) -> ReelResult<Vec<CountryBudget>> {
        let mut budgets: HashMap<Country, u64> = HashMap::new();

        for movie in items {
            if movie.production_countries.len() > 1 {
                bail!(
                    ErrorKind::InvalidData,
                    "Movie has more than one production country",
                    format!(
                        "movie {} has {} production countries",
                        movie.id,
                        movie.production_countries.len()
                    )
                );
            }

            let Some(country) = movie.production_countries.into_iter().next() else {
                continue;
            };

            *budgets.entry(country).or_default() += movie.budget;
        }

        Ok(budgets
            .into_iter()
            .map(|(country, budget)| CountryBudget { country, budget })
            .collect())
    }
}

/// Query 3: rating sum and count per movie.
#[derive(Debug, Clone, Copy, Default)]
pub struct MovieRatingReducer;

impl PartialReducer for MovieRatingReducer {
    type Input = MovieReview;
    type Output = MovieAvgRating;

    const QUERY: QueryKind = QueryKind::BestAndWorstMovies;

    fn reduce(&self, items: Vec<MovieReview>) -> ReelResult<Vec<MovieAvgRating>> {
        let mut ratings: HashMap<String, MovieAvgRating> = HashMap::new();

        for review in items {
            let entry = ratings
                .entry(review.movie_id.clone())
                .or_insert_with(|| MovieAvgRating {
                    movie_id: review.movie_id,
                    title: review.title,
                    rating_sum: 0.0,
                    rating_count: 0,
                });
            entry.rating_sum += review.rating;
            entry.rating_count += 1;
        }

        Ok(ratings.into_values().collect())
    }
}

/// Query 4: number of movies each actor appears in.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActorAppearancesReducer;

impl PartialReducer for ActorAppearancesReducer {
    type Input = Credit;
    type Output = ActorMoviesAmount;

    const QUERY: QueryKind = QueryKind::TopActors;

    fn reduce(&self, items: Vec<Credit>) -> ReelResult<Vec<ActorMoviesAmount>> {
        let mut appearances: HashMap<String, ActorMoviesAmount> = HashMap::new();

        for actor in items.into_iter().flat_map(|credit| credit.actors) {
            let entry = appearances
                .entry(actor.actor_id.clone())
                .or_insert_with(|| ActorMoviesAmount {
                    actor_id: actor.actor_id,
                    actor_name: actor.name,
                    movies_amount: 0,
                });
            entry.movies_amount += 1;
        }

        Ok(appearances.into_values().collect())
    }
}

/// Query 5: profit ratio sums split by overview sentiment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentimentProfitReducer;

impl PartialReducer for SentimentProfitReducer {
    type Input = MovieWithSentiment;
    type Output = SentimentProfitRatioAccumulator;

    const QUERY: QueryKind = QueryKind::SentimentProfitRatio;

    /// Movies with no revenue or no budget have no meaningful ratio and are skipped.
    fn reduce(
        &self,
        items: Vec<MovieWithSentiment>,
    ) -> ReelResult<Vec<SentimentProfitRatioAccumulator>> {
        let mut accumulator = SentimentProfitRatioAccumulator::default();

        for item in items {
            let movie = &item.movie;
            if movie.revenue == 0 || movie.budget == 0 {
                continue;
            }

            let ratio = movie.revenue as f64 / movie.budget as f64;
            match item.sentiment {
                Sentiment::Positive => accumulator.positive_profit_ratio.add(ratio),
                Sentiment::Negative => accumulator.negative_profit_ratio.add(ratio),
            }
        }

        Ok(vec![accumulator])
    }
}
