//! Query aggregates merged by the final reducers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use reel_config::shared::QueryKind;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::reducer::finalize::{Extremes, top_n};
use crate::types::{
    ActorMoviesAmount, BestAndWorstMovies, Country, CountryBudget, MovieAvgRating, RatedMovie,
    SentimentProfitRatioAccumulator, SentimentProfitRatioAverage, TopActors, TopCountries,
};

/// Number of countries reported by query 2.
pub const TOP_COUNTRIES: usize = 5;

/// Number of actors reported by query 4.
pub const TOP_ACTORS: usize = 10;

/// Key to accumulator mapping of one query, merged from the partial results of every shard.
pub trait QueryAggregate: Default + Send + 'static {
    type Item: DeserializeOwned + Send + 'static;
    type Output: Serialize + fmt::Debug + Send + 'static;

    const QUERY: QueryKind;

    fn merge(&mut self, item: Self::Item);

    fn finalize(self) -> Self::Output;
}

/// Query 2: top production countries by cumulative budget.
#[derive(Debug, Default)]
pub struct TopCountriesAggregate {
    budgets: HashMap<Country, u64>,
}

impl QueryAggregate for TopCountriesAggregate {
    type Item = CountryBudget;
    type Output = TopCountries;

    const QUERY: QueryKind = QueryKind::TopCountries;

    fn merge(&mut self, item: CountryBudget) {
        *self.budgets.entry(item.country).or_default() += item.budget;
    }

    fn finalize(self) -> TopCountries {
        let entries = self
            .budgets
            .into_iter()
            .map(|(country, budget)| CountryBudget { country, budget })
            .collect();

        TopCountries {
            countries: top_n(
                entries,
                TOP_COUNTRIES,
                |entry| entry.budget,
                |entry| entry.country.clone(),
            ),
        }
    }
}

/// Query 3: best and worst movie by average rating.
#[derive(Debug, Default)]
pub struct BestAndWorstAggregate {
    ratings: HashMap<String, MovieAvgRating>,
}

impl QueryAggregate for BestAndWorstAggregate {
    type Item = MovieAvgRating;
    type Output = BestAndWorstMovies;

    const QUERY: QueryKind = QueryKind::BestAndWorstMovies;

    fn merge(&mut self, item: MovieAvgRating) {
        match self.ratings.get_mut(&item.movie_id) {
            Some(entry) => {
                entry.rating_sum += item.rating_sum;
                entry.rating_count += item.rating_count;
            }
            None => {
                self.ratings.insert(item.movie_id.clone(), item);
            }
        }
    }

    fn finalize(self) -> BestAndWorstMovies {
        // Movie ids are visited in order so that ties resolve to the smallest id.
        let ordered: BTreeMap<_, _> = self.ratings.into_iter().collect();

        let mut extremes = Extremes::new();
        for (movie_id, rating) in ordered {
            if rating.rating_count == 0 {
                continue;
            }

            let average = rating.rating_sum / f64::from(rating.rating_count);
            extremes.offer(average, (movie_id, rating.title));
        }

        let rated = |entry: Option<(f64, (String, String))>| {
            entry.map(|(rating, (id, title))| RatedMovie { id, title, rating })
        };
        let (best, worst) = extremes.into_parts();

        BestAndWorstMovies {
            best_movie: rated(best),
            worst_movie: rated(worst),
        }
    }
}

/// Query 4: actors with the most appearances.
#[derive(Debug, Default)]
pub struct TopActorsAggregate {
    actors: HashMap<String, ActorMoviesAmount>,
}

impl QueryAggregate for TopActorsAggregate {
    type Item = ActorMoviesAmount;
    type Output = TopActors;

    const QUERY: QueryKind = QueryKind::TopActors;

    fn merge(&mut self, item: ActorMoviesAmount) {
        match self.actors.get_mut(&item.actor_id) {
            Some(entry) => entry.movies_amount += item.movies_amount,
            None => {
                self.actors.insert(item.actor_id.clone(), item);
            }
        }
    }

    fn finalize(self) -> TopActors {
        let entries = self.actors.into_values().collect();

        TopActors {
            top_actors: top_n(
                entries,
                TOP_ACTORS,
                |entry| entry.movies_amount,
                |entry| entry.actor_id.clone(),
            ),
        }
    }
}

/// Query 5: average profit ratio per sentiment.
#[derive(Debug, Default)]
pub struct SentimentProfitAggregate {
    accumulator: SentimentProfitRatioAccumulator,
}

impl QueryAggregate for SentimentProfitAggregate {
    type Item = SentimentProfitRatioAccumulator;
    type Output = SentimentProfitRatioAverage;

    const QUERY: QueryKind = QueryKind::SentimentProfitRatio;

    fn merge(&mut self, item: SentimentProfitRatioAccumulator) {
        self.accumulator
            .positive_profit_ratio
            .merge(&item.positive_profit_ratio);
        self.accumulator
            .negative_profit_ratio
            .merge(&item.negative_profit_ratio);
    }

    fn finalize(self) -> SentimentProfitRatioAverage {
        SentimentProfitRatioAverage {
            positive_avg_profit_ratio: self.accumulator.positive_profit_ratio.average(),
            negative_avg_profit_ratio: self.accumulator.negative_profit_ratio.average(),
        }
    }
}
