use serde::{Deserialize, Serialize};

use crate::shared::{
    BatchConfig, JoinerConfig, QueryKind, ReducerConfig, SessionLimitsConfig, ValidationError,
};

/// Shape of an in-process deployment: every stage runs as a task of one process.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TopologyConfig {
    /// Number of joiner shards reviews and credits are partitioned across.
    pub joiner_shards: u16,
    /// Batching used when the input relations are streamed in.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Session bounds applied to every joiner shard.
    #[serde(default)]
    pub limits: SessionLimitsConfig,
}

impl TopologyConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.joiner_shards == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "topology.joiner_shards".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        self.batch.validate()?;
        self.limits.validate()
    }

    /// Returns the configuration of every joiner shard.
    pub fn joiners(&self) -> Vec<JoinerConfig> {
        (0..self.joiner_shards)
            .map(|shard_id| JoinerConfig {
                shard_id,
                shards: self.joiner_shards,
                limits: self.limits.clone(),
                replay_retry_delay_ms: JoinerConfig::DEFAULT_REPLAY_RETRY_DELAY_MS,
            })
            .collect()
    }

    /// Returns the final reducer configuration of a query fed by the joiners.
    pub fn reducer(&self, query: QueryKind) -> ReducerConfig {
        ReducerConfig {
            query,
            shards: self.joiner_shards,
            limits: self.limits.clone(),
        }
    }
}
