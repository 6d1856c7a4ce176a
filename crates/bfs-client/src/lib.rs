//! Client core of the block store.
//!
//! [`StorageCoordinator`] is the entry point: it turns whole-file puts and
//! gets into replicated block transfers against storage nodes reached
//! through [`NodeClient`]s, keeps the namespace in step, and runs repair,
//! delete reconciliation and heartbeat polling in the background.

pub mod config;
pub mod coordinator;
#[cfg(any(test, feature = "test-util"))]
pub mod local_client;
pub mod maintenance;
pub mod node_client;
pub mod retry;
pub mod write;

pub use config::{ClientConfig, NodeEndpoint, QuorumPolicy, WriteMode};
pub use coordinator::{BlockLocation, LocatedFile, PutOptions, StorageCoordinator};
pub use maintenance::RepairReport;
#[cfg(any(test, feature = "test-util"))]
pub use local_client::LocalNodeClient;
pub use node_client::{NodeClient, TcpNodeClient};
pub use retry::ExponentialBackoff;
pub use write::BlockWriteState;
