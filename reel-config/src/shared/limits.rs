use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Resource bounds for the join sessions held by one joiner.
///
/// Probe batches that arrive before a client's movies are complete are buffered in memory; these
/// limits turn unbounded growth into an explicit error.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionLimitsConfig {
    /// Maximum number of probe batches buffered per session while awaiting movies.
    #[serde(default = "default_max_pending_batches")]
    pub max_pending_batches: usize,
    /// Maximum number of concurrently live sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Number of recently finished clients remembered to drop late batches.
    #[serde(default = "default_finished_clients_memory")]
    pub finished_clients_memory: usize,
}

impl SessionLimitsConfig {
    /// Default pending batch bound per session.
    pub const DEFAULT_MAX_PENDING_BATCHES: usize = 10_000;

    /// Default live session bound.
    pub const DEFAULT_MAX_SESSIONS: usize = 64;

    /// Default finished client memory.
    pub const DEFAULT_FINISHED_CLIENTS_MEMORY: usize = 1024;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_pending_batches == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "limits.max_pending_batches".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_sessions == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "limits.max_sessions".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for SessionLimitsConfig {
    fn default() -> Self {
        Self {
            max_pending_batches: default_max_pending_batches(),
            max_sessions: default_max_sessions(),
            finished_clients_memory: default_finished_clients_memory(),
        }
    }
}

fn default_max_pending_batches() -> usize {
    SessionLimitsConfig::DEFAULT_MAX_PENDING_BATCHES
}

fn default_max_sessions() -> usize {
    SessionLimitsConfig::DEFAULT_MAX_SESSIONS
}

fn default_finished_clients_memory() -> usize {
    SessionLimitsConfig::DEFAULT_FINISHED_CLIENTS_MEMORY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let limits: SessionLimitsConfig = serde_json::from_str(r#"{"max_sessions": 3}"#).unwrap();

        assert_eq!(limits.max_sessions, 3);
        assert_eq!(
            limits.max_pending_batches,
            SessionLimitsConfig::DEFAULT_MAX_PENDING_BATCHES
        );
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn zero_pending_bound_is_rejected() {
        let limits = SessionLimitsConfig {
            max_pending_batches: 0,
            ..Default::default()
        };

        assert!(matches!(
            limits.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "limits.max_pending_batches"
        ));
    }
}
