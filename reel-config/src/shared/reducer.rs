use serde::{Deserialize, Serialize};

use crate::shared::{QueryKind, SessionLimitsConfig, ValidationError};

/// Configuration of the final reducer of one query.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReducerConfig {
    /// The query merged by this reducer.
    pub query: QueryKind,
    /// Number of upstream shards; each one sends its own terminal marker.
    pub shards: u16,
    /// Bounds on live and remembered client sessions.
    #[serde(default)]
    pub limits: SessionLimitsConfig,
}

impl ReducerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.shards == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "reducer.shards".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        self.limits.validate()
    }

    pub fn queues(&self) -> QueryQueues {
        QueryQueues::for_query(self.query)
    }
}

/// Queue names along the reduction path of one query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryQueues {
    /// Input of the partial reducers.
    pub to_reduce: String,
    /// Partial results, input of the final reducer.
    pub to_final_reduce: String,
    /// Final results, consumed by the gateway.
    pub results: String,
}

impl QueryQueues {
    pub fn for_query(query: QueryKind) -> Self {
        Self {
            to_reduce: format!("{query}-to-reduce"),
            to_final_reduce: format!("{query}-to-final-reduce"),
            results: format!("{query}-results"),
        }
    }
}
