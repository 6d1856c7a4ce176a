use bfs_config::{Config, ConfigError};
use bfs_logging::LogConfig;
use bfs_types::NodeId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageNodeConfig {
    pub node_id: NodeId,
    /// `host:port` to listen on.
    pub listen: String,
    /// Total bytes of block frames this node accepts before answering FULL.
    pub capacity_bytes: u64,
    pub log: LogConfig,
}

impl Default for StorageNodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(1),
            listen: "127.0.0.1:9100".into(),
            capacity_bytes: 1 << 30,
            log: LogConfig::default(),
        }
    }
}

impl Config for StorageNodeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity_bytes == 0 {
            return Err(ConfigError::invalid("capacity_bytes", "must be positive"));
        }
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::invalid(
                "listen",
                format!("{:?} is not a socket address", self.listen),
            ));
        }
        Ok(())
    }

    fn hot_update(&mut self, other: &Self) {
        self.log.level = other.log.level.clone();
    }
}
