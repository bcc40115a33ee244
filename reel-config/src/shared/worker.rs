use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{TopologyConfig, ValidationError};

/// Root configuration of the `reel-worker` binary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    pub topology: TopologyConfig,
    /// Port of the Prometheus scrape endpoint, disabled when unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.topology.validate()
    }
}

impl Config for WorkerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
