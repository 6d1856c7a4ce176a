use std::time::Duration;

use bfs_config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Liveness thresholds for storage nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// A node whose last heartbeat is older than this becomes Suspect.
    #[serde(with = "bfs_config::humantime_compat")]
    pub heartbeat_timeout: Duration,

    /// Consecutive call timeouts after which a node is declared Dead.
    pub dead_after_timeouts: u32,

    /// A node silent for longer than this is declared Dead.
    #[serde(with = "bfs_config::humantime_compat")]
    pub dead_after_missed_heartbeat: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(10),
            dead_after_timeouts: 3,
            dead_after_missed_heartbeat: Duration::from_secs(60),
        }
    }
}

impl Config for ClusterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_timeout.is_zero() {
            return Err(ConfigError::invalid("heartbeat_timeout", "must be positive"));
        }
        if self.dead_after_timeouts == 0 {
            return Err(ConfigError::invalid("dead_after_timeouts", "must be at least 1"));
        }
        if self.dead_after_missed_heartbeat < self.heartbeat_timeout {
            return Err(ConfigError::invalid(
                "dead_after_missed_heartbeat",
                "must not be shorter than heartbeat_timeout",
            ));
        }
        Ok(())
    }

    fn hot_update(&mut self, other: &Self) {
        *self = other.clone();
    }
}
