//! Opcode dispatch for one storage node.

use std::sync::Arc;

use bfs_proto::{BlockCodec, NodeRequest, NodeResponse, Opcode, ResponseStatus};
use bfs_types::{BlockId, NodeId};
use tracing::{debug, warn};

use crate::block_store::BlockStore;

#[derive(Debug, Clone)]
pub struct StorageNodeService {
    node_id: NodeId,
    store: Arc<BlockStore>,
}

impl StorageNodeService {
    pub fn new(node_id: NodeId, store: Arc<BlockStore>) -> Self {
        Self { node_id, store }
    }

    pub fn in_memory(node_id: NodeId, capacity: u64) -> Self {
        Self::new(node_id, Arc::new(BlockStore::new(capacity)))
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn handle(&self, req: NodeRequest) -> NodeResponse {
        match req.opcode {
            Opcode::Store => self.store_block(req.block_id, req.payload),
            Opcode::Fetch => self.fetch_block(req.block_id),
            Opcode::Delete => self.delete_block(req.block_id),
            Opcode::Heartbeat => self.heartbeat(),
        }
    }

    fn store_block(&self, block_id: BlockId, payload: Option<bytes::Bytes>) -> NodeResponse {
        let Some(frame) = payload else {
            warn!(node_id = %self.node_id, block_id = %block_id, "store without payload");
            return NodeResponse::error(ResponseStatus::ChecksumFail);
        };
        if let Err(e) = BlockCodec::decode(&frame) {
            warn!(node_id = %self.node_id, block_id = %block_id, error = %e, "rejecting corrupt block");
            return NodeResponse::error(ResponseStatus::ChecksumFail);
        }
        let len = frame.len();
        match self.store.put(block_id, frame) {
            Ok(()) => {
                debug!(node_id = %self.node_id, block_id = %block_id, len, "stored");
                NodeResponse::ok()
            }
            // BlockStore::put only fails on capacity.
            Err(e) => {
                warn!(node_id = %self.node_id, block_id = %block_id, error = %e, "node full");
                NodeResponse::error(ResponseStatus::Full)
            }
        }
    }

    fn fetch_block(&self, block_id: BlockId) -> NodeResponse {
        let frame = match self.store.get(block_id) {
            Ok(frame) => frame,
            Err(_) => return NodeResponse::error(ResponseStatus::NotFound),
        };
        // Re-verify on the way out to catch corruption at rest.
        if let Err(e) = BlockCodec::decode(&frame) {
            warn!(node_id = %self.node_id, block_id = %block_id, error = %e, "stored block is corrupt");
            return NodeResponse::error(ResponseStatus::ChecksumFail);
        }
        debug!(node_id = %self.node_id, block_id = %block_id, "fetched");
        NodeResponse::ok_with(frame)
    }

    fn delete_block(&self, block_id: BlockId) -> NodeResponse {
        match self.store.remove(block_id) {
            Ok(()) => {
                debug!(node_id = %self.node_id, block_id = %block_id, "deleted");
                NodeResponse::ok()
            }
            Err(_) => NodeResponse::error(ResponseStatus::NotFound),
        }
    }

    fn heartbeat(&self) -> NodeResponse {
        let ids = self.store.block_ids();
        match NodeResponse::block_list(&ids) {
            Ok(rsp) => rsp,
            Err(e) => {
                warn!(node_id = %self.node_id, error = %e, "cannot encode block report");
                NodeResponse::ok()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn service() -> StorageNodeService {
        StorageNodeService::in_memory(NodeId(1), 1 << 20)
    }

    #[test]
    fn test_store_fetch_delete() {
        let svc = service();
        let block = BlockCodec::encode(b"replica bytes").unwrap();
        let rsp = svc.handle(NodeRequest::store(BlockId(3), block.payload.clone()));
        assert_eq!(rsp.status, ResponseStatus::Ok);

        let rsp = svc.handle(NodeRequest::fetch(BlockId(3)));
        assert_eq!(rsp.status, ResponseStatus::Ok);
        assert_eq!(rsp.payload.unwrap(), block.payload);

        assert_eq!(svc.handle(NodeRequest::delete(BlockId(3))).status, ResponseStatus::Ok);
        assert_eq!(
            svc.handle(NodeRequest::delete(BlockId(3))).status,
            ResponseStatus::NotFound
        );
        assert_eq!(
            svc.handle(NodeRequest::fetch(BlockId(3))).status,
            ResponseStatus::NotFound
        );
    }

    #[test]
    fn test_store_rejects_corrupt_frame() {
        let svc = service();
        let block = BlockCodec::encode(b"replica bytes").unwrap();
        let mut raw = block.payload.to_vec();
        raw[14] ^= 0xFF;
        let rsp = svc.handle(NodeRequest::store(BlockId(1), Bytes::from(raw)));
        assert_eq!(rsp.status, ResponseStatus::ChecksumFail);
        assert!(svc.store().is_empty());

        let rsp = svc.handle(NodeRequest {
            opcode: Opcode::Store,
            block_id: BlockId(2),
            payload: None,
        });
        assert_eq!(rsp.status, ResponseStatus::ChecksumFail);
    }

    #[test]
    fn test_fetch_detects_bit_rot() {
        let svc = service();
        let block = BlockCodec::encode(b"replica bytes").unwrap();
        svc.handle(NodeRequest::store(BlockId(1), block.payload.clone()));
        let mut raw = block.payload.to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        svc.store().overwrite_raw(BlockId(1), Bytes::from(raw));
        assert_eq!(
            svc.handle(NodeRequest::fetch(BlockId(1))).status,
            ResponseStatus::ChecksumFail
        );
    }

    #[test]
    fn test_full_node() {
        let svc = StorageNodeService::in_memory(NodeId(1), 16);
        let block = BlockCodec::encode(b"this block is too large").unwrap();
        assert_eq!(
            svc.handle(NodeRequest::store(BlockId(1), block.payload)).status,
            ResponseStatus::Full
        );
    }

    #[test]
    fn test_heartbeat_reports_blocks() {
        let svc = service();
        for id in [4u64, 2] {
            svc.handle(NodeRequest::store(BlockId(id), BlockCodec::encode(b"x").unwrap().payload));
        }
        let rsp = svc.handle(NodeRequest::heartbeat());
        let ids = NodeResponse::decode_block_list(&rsp.payload.unwrap()).unwrap();
        assert_eq!(ids, vec![BlockId(2), BlockId(4)]);
    }
}
