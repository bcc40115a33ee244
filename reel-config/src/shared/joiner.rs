use serde::{Deserialize, Serialize};

use crate::shared::{QueryKind, SessionLimitsConfig, ValidationError};

const fn default_replay_retry_delay_ms() -> u64 {
    JoinerConfig::DEFAULT_REPLAY_RETRY_DELAY_MS
}

/// Configuration of one joiner shard.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JoinerConfig {
    /// Index of this shard, in `0..shards`.
    pub shard_id: u16,
    /// Total number of joiner shards in the deployment.
    pub shards: u16,
    /// Session resource bounds.
    #[serde(default)]
    pub limits: SessionLimitsConfig,
    /// Delay before replaying buffered probes again after a failed publish.
    #[serde(default = "default_replay_retry_delay_ms")]
    pub replay_retry_delay_ms: u64,
}

impl JoinerConfig {
    pub const DEFAULT_REPLAY_RETRY_DELAY_MS: u64 = 500;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.shard_id >= self.shards {
            return Err(ValidationError::ShardOutOfRange {
                shard_id: self.shard_id,
                shards: self.shards,
            });
        }

        self.limits.validate()
    }

    /// Returns the queue names this shard consumes from and publishes to.
    pub fn queues(&self) -> JoinerQueues {
        JoinerQueues::for_shard(self.shard_id)
    }
}

/// Queue names used by one joiner shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinerQueues {
    pub movies: String,
    pub reviews: String,
    pub credits: String,
    /// Output of the review join, consumed by the query 3 partial reducer.
    pub joined_reviews: String,
    /// Output of the credit filter, consumed by the query 4 partial reducer.
    pub filtered_credits: String,
}

impl JoinerQueues {
    pub fn for_shard(shard_id: u16) -> Self {
        Self {
            movies: format!("movies-to-join-{shard_id}"),
            reviews: format!("reviews-to-join-{shard_id}"),
            credits: format!("credits-to-join-{shard_id}"),
            joined_reviews: format!("{}-to-reduce", QueryKind::BestAndWorstMovies),
            filtered_credits: format!("{}-to-reduce", QueryKind::TopActors),
        }
    }
}
