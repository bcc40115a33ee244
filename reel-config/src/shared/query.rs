use std::fmt;

use serde::{Deserialize, Serialize};

/// Analytic queries computed by the reducer stages.
///
/// Query 1 is answered directly by the filters and never reaches a reducer, so it has no
/// variant here.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Query 2: top five production countries by cumulative budget.
    TopCountries,
    /// Query 3: best and worst rated movies.
    BestAndWorstMovies,
    /// Query 4: top ten actors by number of appearances.
    TopActors,
    /// Query 5: average profit ratio per overview sentiment.
    SentimentProfitRatio,
}

impl QueryKind {
    /// All reducer queries in id order.
    pub const ALL: [QueryKind; 4] = [
        QueryKind::TopCountries,
        QueryKind::BestAndWorstMovies,
        QueryKind::TopActors,
        QueryKind::SentimentProfitRatio,
    ];

    /// Returns the numeric query id used in queue names and results.
    pub fn id(&self) -> u8 {
        match self {
            QueryKind::TopCountries => 2,
            QueryKind::BestAndWorstMovies => 3,
            QueryKind::TopActors => 4,
            QueryKind::SentimentProfitRatio => 5,
        }
    }

    /// Resolves a numeric query id.
    pub fn from_id(id: u8) -> Option<QueryKind> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.id())
    }
}
