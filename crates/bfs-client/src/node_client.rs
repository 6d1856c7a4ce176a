//! Transport-level operations against one storage node.
//!
//! [`TcpNodeClient`] talks the framed wire protocol over TCP.

use async_trait::async_trait;
use bfs_proto::{read_message, write_message, NetError, NodeRequest, NodeResponse};
use bfs_types::status_code::StorageCode;
use bfs_types::{BlockId, NodeId, Result, Status};
use bytes::Bytes;
use tokio::net::TcpStream;

#[async_trait]
pub trait NodeClient: Send + Sync {
    fn node_id(&self) -> NodeId;

    /// Store a framed block. Fails with NODE_UNREACHABLE, NODE_FULL or
    /// CHECKSUM_MISMATCH.
    async fn store(&self, block_id: BlockId, frame: Bytes) -> Result<()>;

    /// Fetch a framed block. Fails with BLOCK_NOT_FOUND, NODE_UNREACHABLE or
    /// CHECKSUM_MISMATCH.
    async fn fetch(&self, block_id: BlockId) -> Result<Bytes>;

    async fn delete(&self, block_id: BlockId) -> Result<()>;

    /// Ids of every block the node holds.
    async fn heartbeat_report(&self) -> Result<Vec<BlockId>>;

    /// Calls the client can carry at once. The coordinator queues the rest
    /// before starting their rpc timeout. `None` means unbounded.
    fn max_inflight(&self) -> Option<usize> {
        None
    }
}

fn net_status(node_id: NodeId, e: NetError) -> Status {
    let code = if e.is_corruption() {
        StorageCode::CHECKSUM_MISMATCH
    } else if matches!(e, NetError::MessageTooLarge { .. }) {
        // An oversized message says nothing about the node being down.
        StorageCode::BAD_REQUEST
    } else {
        StorageCode::NODE_UNREACHABLE
    };
    Status::with_message(code, format!("node {}: {}", node_id, e))
}

pub(crate) fn block_list(node_id: NodeId, payload: Option<Bytes>) -> Result<Vec<BlockId>> {
    let payload = payload.unwrap_or_default();
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    NodeResponse::decode_block_list(&payload).map_err(|e| {
        Status::with_message(
            StorageCode::BAD_REQUEST,
            format!("node {} sent a bad block report: {}", node_id, e),
        )
    })
}

/// One TCP connection per node, reused across calls. Calls on the same
/// client are serialized on that connection.
///
/// The stream is taken out of its slot for the duration of a call and only
/// returned on success, so a call cancelled mid-flight closes the socket
/// instead of leaving a half-read response behind.
pub struct TcpNodeClient {
    node_id: NodeId,
    address: String,
    conn: tokio::sync::Mutex<Option<TcpStream>>,
}

impl TcpNodeClient {
    pub fn new(node_id: NodeId, address: impl Into<String>) -> Self {
        Self {
            node_id,
            address: address.into(),
            conn: tokio::sync::Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn call(&self, req: NodeRequest) -> Result<NodeResponse> {
        let mut slot = self.conn.lock().await;
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => {
                let stream = TcpStream::connect(&self.address)
                    .await
                    .map_err(|e| net_status(self.node_id, e.into()))?;
                stream
                    .set_nodelay(true)
                    .map_err(|e| net_status(self.node_id, e.into()))?;
                stream
            }
        };
        write_message(&mut stream, &req)
            .await
            .map_err(|e| net_status(self.node_id, e))?;
        let rsp: NodeResponse = read_message(&mut stream)
            .await
            .map_err(|e| net_status(self.node_id, e))?;
        *slot = Some(stream);
        Ok(rsp)
    }
}

#[async_trait]
impl NodeClient for TcpNodeClient {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    async fn store(&self, block_id: BlockId, frame: Bytes) -> Result<()> {
        self.call(NodeRequest::store(block_id, frame))
            .await?
            .into_result(block_id)?;
        Ok(())
    }

    async fn fetch(&self, block_id: BlockId) -> Result<Bytes> {
        self.call(NodeRequest::fetch(block_id))
            .await?
            .into_result(block_id)?
            .ok_or_else(|| {
                Status::with_message(
                    StorageCode::BAD_REQUEST,
                    format!("node {} returned no payload for block {}", self.node_id, block_id),
                )
            })
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
        block_list(self.node_id, payload)
    }

    fn max_inflight(&self) -> Option<usize> {
        Some(1)
    }
}
