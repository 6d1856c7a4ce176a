//! Client configuration.

use std::time::Duration;

use bfs_cluster::ClusterConfig;
use bfs_config::{Config, ConfigError};
use bfs_namespace::{ReplicationPolicy, MAX_BLOCK_SIZE};
use bfs_types::NodeId;
use serde::{Deserialize, Serialize};

/// What to do when a block cannot reach its write quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Fail the whole put with WRITE_QUORUM_FAILED.
    #[default]
    Strict,
    /// Finalize with whatever replicas were acknowledged and leave the rest
    /// to repair.
    Lenient,
}

/// Acknowledgements needed before a block write counts as durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumPolicy {
    #[default]
    All,
    Majority,
}

impl QuorumPolicy {
    pub fn required(&self, replication: usize) -> usize {
        match self {
            QuorumPolicy::All => replication,
            QuorumPolicy::Majority => replication / 2 + 1,
        }
    }
}

/// A storage node known at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub node_id: NodeId,
    pub address: String,
    #[serde(default)]
    pub rack: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Policy for puts that do not specify one.
    pub default_policy: ReplicationPolicy,

    pub write_mode: WriteMode,

    pub quorum: QuorumPolicy,

    /// Extra write rounds per block after the first one falls short.
    pub write_retry_budget: u32,

    /// Bound on a single node call.
    #[serde(with = "bfs_config::humantime_compat")]
    pub rpc_timeout: Duration,

    /// Bound on a whole put or get, retries included.
    #[serde(with = "bfs_config::humantime_compat")]
    pub operation_timeout: Duration,

    #[serde(with = "bfs_config::humantime_compat")]
    pub retry_init_wait: Duration,

    #[serde(with = "bfs_config::humantime_compat")]
    pub retry_max_wait: Duration,

    #[serde(with = "bfs_config::humantime_compat")]
    pub repair_interval: Duration,

    #[serde(with = "bfs_config::humantime_compat")]
    pub reconcile_interval: Duration,

    #[serde(with = "bfs_config::humantime_compat")]
    pub heartbeat_interval: Duration,

    /// Concurrent replica transfers across all operations.
    pub max_parallel_transfers: usize,

    pub cluster: ClusterConfig,

    pub nodes: Vec<NodeEndpoint>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_policy: ReplicationPolicy::default(),
            write_mode: WriteMode::default(),
            quorum: QuorumPolicy::default(),
            write_retry_budget: 2,
            rpc_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(120),
            retry_init_wait: Duration::from_millis(50),
            retry_max_wait: Duration::from_secs(2),
            repair_interval: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(3),
            max_parallel_transfers: 32,
            cluster: ClusterConfig::default(),
            nodes: Vec::new(),
        }
    }
}

impl Config for ClientConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_policy.replication == 0 {
            return Err(ConfigError::invalid(
                "default_policy.replication",
                "must be at least 1",
            ));
        }
        if self.default_policy.block_size == 0 {
            return Err(ConfigError::invalid(
                "default_policy.block_size",
                "must be positive",
            ));
        }
        if self.default_policy.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::invalid(
                "default_policy.block_size",
                format!("must not exceed {}", MAX_BLOCK_SIZE),
            ));
        }
        let durations = [
            ("rpc_timeout", self.rpc_timeout),
            ("operation_timeout", self.operation_timeout),
            ("retry_max_wait", self.retry_max_wait),
            ("repair_interval", self.repair_interval),
            ("reconcile_interval", self.reconcile_interval),
            ("heartbeat_interval", self.heartbeat_interval),
        ];
        if let Some((key, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::invalid(*key, "must be positive"));
        }
        if self.max_parallel_transfers == 0 {
            return Err(ConfigError::invalid("max_parallel_transfers", "must be positive"));
        }
        self.cluster.validate()
    }

    fn hot_update(&mut self, other: &Self) {
        self.default_policy = other.default_policy;
        self.write_mode = other.write_mode;
        self.quorum = other.quorum;
        self.write_retry_budget = other.write_retry_budget;
        self.rpc_timeout = other.rpc_timeout;
        self.operation_timeout = other.operation_timeout;
        self.retry_init_wait = other.retry_init_wait;
        self.retry_max_wait = other.retry_max_wait;
    }
}
