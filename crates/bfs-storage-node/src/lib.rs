//! Storage node: holds framed block replicas in memory and serves the
//! STORE / FETCH / DELETE / HEARTBEAT protocol.

pub mod block_store;
pub mod config;
pub mod server;
pub mod service;

pub use block_store::BlockStore;
pub use config::StorageNodeConfig;
pub use server::NodeServer;
pub use service::StorageNodeService;
