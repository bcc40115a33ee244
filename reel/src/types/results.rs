use serde::{Deserialize, Serialize};

use crate::types::{ClientId, Country};

/// Budget invested by one production country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryBudget {
    pub country: Country,
    pub budget: u64,
}

/// Running rating sum of one movie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieAvgRating {
    pub movie_id: String,
    pub title: String,
    pub rating_sum: f64,
    pub rating_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorMoviesAmount {
    pub actor_id: String,
    pub actor_name: String,
    pub movies_amount: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfitRatioAccumulator {
    pub profit_ratio_sum: f64,
    pub profit_ratio_count: u32,
}

impl ProfitRatioAccumulator {
    pub fn add(&mut self, ratio: f64) {
        self.profit_ratio_sum += ratio;
        self.profit_ratio_count += 1;
    }

    pub fn merge(&mut self, other: &ProfitRatioAccumulator) {
        self.profit_ratio_sum += other.profit_ratio_sum;
        self.profit_ratio_count += other.profit_ratio_count;
    }

    /// Returns the average ratio, or [`None`] when no sample was accumulated.
    pub fn average(&self) -> Option<f64> {
        (self.profit_ratio_count > 0)
            .then(|| self.profit_ratio_sum / f64::from(self.profit_ratio_count))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentProfitRatioAccumulator {
    pub positive_profit_ratio: ProfitRatioAccumulator,
    pub negative_profit_ratio: ProfitRatioAccumulator,
}

/// Final answer of query 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopCountries {
    pub countries: Vec<CountryBudget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedMovie {
    pub id: String,
    pub title: String,
    pub rating: f64,
}

/// Final answer of query 3. Both sides are unset when no review matched any movie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestAndWorstMovies {
    pub best_movie: Option<RatedMovie>,
    pub worst_movie: Option<RatedMovie>,
}

/// Final answer of query 4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopActors {
    pub top_actors: Vec<ActorMoviesAmount>,
}

/// Final answer of query 5. A side is unset when no movie contributed a ratio to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentProfitRatioAverage {
    pub positive_avg_profit_ratio: Option<f64>,
    pub negative_avg_profit_ratio: Option<f64>,
}

/// Result envelope delivered back to the gateway of a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult<T> {
    pub client_id: ClientId,
    pub query_id: u8,
    /// Marks the final answer of the query; a client is done once every query it asked for
    /// delivered one.
    pub last: bool,
    pub items: T,
}
