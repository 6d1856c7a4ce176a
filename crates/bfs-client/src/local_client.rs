//! In-process node client for tests.
//!
//! [`LocalNodeClient`] calls a [`StorageNodeService`] directly and can inject
//! faults, so coordinator behaviour is testable without sockets. Built for
//! this crate's tests and for dependents that enable `test-util`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bfs_proto::{NodeRequest, NodeResponse};
use bfs_storage_node::StorageNodeService;
use bfs_types::status_code::StorageCode;
use bfs_types::{make_error_msg, BlockId, NodeId, Result, Status};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::node_client::{block_list, NodeClient};

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    delay: Option<Duration>,
    corrupt: HashSet<BlockId>,
}

/// In-process client wrapping a [`StorageNodeService`], with fault
/// injection.
pub struct LocalNodeClient {
    service: StorageNodeService,
    faults: Mutex<Faults>,
    fetches: AtomicU64,
    /// Emulates a connection that carries a bounded number of calls.
    gate: Option<(usize, Semaphore)>,
}

impl LocalNodeClient {
    pub fn new(service: StorageNodeService) -> Self {
        Self {
            service,
            faults: Mutex::new(Faults::default()),
            fetches: AtomicU64::new(0),
            gate: None,
        }
    }

    /// Serve at most `limit` calls at a time; the rest wait inside the call.
    pub fn with_max_inflight(mut self, limit: usize) -> Self {
        let limit = limit.max(1);
        self.gate = Some((limit, Semaphore::new(limit)));
        self
    }

    pub fn in_memory(node_id: NodeId, capacity: u64) -> Self {
        Self::new(StorageNodeService::in_memory(node_id, capacity))
    }

    pub fn service(&self) -> &StorageNodeService {
        &self.service
    }

    /// Every call fails with NODE_UNREACHABLE while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.faults.lock().unreachable = unreachable;
    }

    /// Delay every call, e.g. past the coordinator's rpc timeout.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.faults.lock().delay = delay;
    }

    /// Flip a bit in every payload returned for `block_id`.
    pub fn corrupt_block(&self, block_id: BlockId) {
        self.faults.lock().corrupt.insert(block_id);
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn call(&self, req: NodeRequest) -> Result<NodeResponse> {
        let _slot = match &self.gate {
            Some((_, gate)) => Some(gate.acquire().await.map_err(|_| {
                Status::with_message(
                    StorageCode::NODE_UNREACHABLE,
                    format!("node {} closed", self.service.node_id()),
                )
            })?),
            None => None,
        };
        let delay = self.faults.lock().delay;
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.faults.lock().unreachable {
            return make_error_msg(
                StorageCode::NODE_UNREACHABLE,
                format!("node {} unreachable", self.service.node_id()),
            );
        }
        Ok(self.service.handle(req))
    }
}

#[async_trait]
impl NodeClient for LocalNodeClient {
    fn node_id(&self) -> NodeId {
        self.service.node_id()
    }

    async fn store(&self, block_id: BlockId, frame: Bytes) -> Result<()> {
        self.call(NodeRequest::store(block_id, frame))
            .await?
            .into_result(block_id)?;
        Ok(())
    }

    async fn fetch(&self, block_id: BlockId) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let payload = self
            .call(NodeRequest::fetch(block_id))
            .await?
            .into_result(block_id)?
            .unwrap_or_default();
        if self.faults.lock().corrupt.contains(&block_id) && !payload.is_empty() {
            let mut raw = payload.to_vec();
            let last = raw.len() - 1;
            raw[last] ^= 0x01;
            return Ok(Bytes::from(raw));
        }
        Ok(payload)
    }

    async fn delete(&self, block_id: BlockId) -> Result<()> {
        self.call(NodeRequest::delete(block_id))
            .await?
            .into_result(block_id)?;
        Ok(())
    }

    async fn heartbeat_report(&self) -> Result<Vec<BlockId>> {
        let payload = self
            .call(NodeRequest::heartbeat())
            .await?
            .into_result(BlockId(0))?;
        block_list(self.node_id(), payload)
    }

    fn max_inflight(&self) -> Option<usize> {
        self.gate.as_ref().map(|(limit, _)| *limit)
    }
}
