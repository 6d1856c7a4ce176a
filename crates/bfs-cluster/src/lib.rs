//! Storage node membership and replica placement.
//!
//! [`NodeRegistry`] is the table of [`NodeRecord`]s fed by heartbeats and
//! call outcomes; [`ReplicaPlacer`] reads it synchronously to choose target
//! nodes for new or repaired replicas.

pub mod config;
pub mod placer;
pub mod registry;

pub use config::ClusterConfig;
pub use placer::ReplicaPlacer;
pub use registry::{NodeRecord, NodeRegistry, NodeState};
