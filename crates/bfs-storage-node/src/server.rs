//! TCP front end for a [`StorageNodeService`].
//!
//! Each connection carries a sequence of framed `NodeRequest`s, each answered
//! by one framed `NodeResponse` in order.

use std::net::SocketAddr;
use std::sync::Arc;

use bfs_proto::{read_message, write_message, NetError, NodeRequest, NodeResponse};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};

use crate::service::StorageNodeService;

pub struct NodeServer {
    service: Arc<StorageNodeService>,
    shutdown: Arc<Notify>,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

impl NodeServer {
    pub fn new(service: StorageNodeService) -> Self {
        Self {
            service: Arc::new(service),
            shutdown: Arc::new(Notify::new()),
            local_addr: None,
            accept_task: None,
        }
    }

    pub fn service(&self) -> &StorageNodeService {
        &self.service
    }

    /// Bind `addr` and start serving in the background. Returns the bound
    /// address, which differs from `addr` when port 0 was requested.
    pub async fn start(&mut self, addr: &str) -> Result<SocketAddr, NetError> {
        if let Some(addr) = self.local_addr {
            tracing::warn!(%addr, "server already running, ignoring duplicate start");
            return Ok(addr);
        }
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        self.local_addr = Some(local);

        let service = Arc::clone(&self.service);
        let shutdown = Arc::clone(&self.shutdown);
        tracing::info!(addr = %local, node_id = %service.node_id(), "storage node listening");
        self.accept_task = Some(tokio::spawn(async move {
            Self::accept_loop(listener, service, shutdown).await;
            tracing::info!(addr = %local, "accept loop exited");
        }));
        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.accept_task.is_some()
    }

    /// Signal the accept loop and every open connection, then wait for them.
    pub async fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            tracing::info!("storage node stopping");
            self.shutdown.notify_waiters();
            let _ = task.await;
            self.local_addr = None;
        }
    }

    async fn accept_loop(
        listener: TcpListener,
        service: Arc<StorageNodeService>,
        shutdown: Arc<Notify>,
    ) {
        let mut tasks = JoinSet::new();
        let stopped = shutdown.notified();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                biased;

                _ = &mut stopped => break,

                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let service = Arc::clone(&service);
                        let shutdown = Arc::clone(&shutdown);
                        tasks.spawn(async move {
                            if let Err(e) = Self::handle_connection(stream, service, shutdown).await {
                                tracing::debug!(%peer, error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept error");
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                },

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        tasks.shutdown().await;
    }

    async fn handle_connection(
        mut stream: TcpStream,
        service: Arc<StorageNodeService>,
        shutdown: Arc<Notify>,
    ) -> Result<(), NetError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        tracing::debug!(%peer, "new connection");
        let stopped = shutdown.notified();
        tokio::pin!(stopped);

        loop {
            let request: NodeRequest = tokio::select! {
                biased;
                _ = &mut stopped => return Ok(()),
                result = read_message(&mut stream) => match result {
                    Ok(req) => req,
                    Err(NetError::ConnectionClosed) => return Ok(()),
                    Err(e) => return Err(e),
                },
            };
            tracing::debug!(
                %peer,
                opcode = ?request.opcode,
                block_id = %request.block_id,
                "dispatching request"
            );
            let response: NodeResponse = service.handle(request);
            write_message(&mut stream, &response).await?;
        }
    }
}

impl Drop for NodeServer {
    fn drop(&mut self) {
        if self.accept_task.is_some() {
            self.shutdown.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfs_proto::{write_frame, BlockCodec, ResponseStatus};
    use bfs_types::{BlockId, NodeId};

    async fn started() -> (NodeServer, SocketAddr) {
        let mut server = NodeServer::new(StorageNodeService::in_memory(NodeId(1), 1 << 20));
        let addr = server.start("127.0.0.1:0").await.unwrap();
        (server, addr)
    }

    #[tokio::test]
    async fn test_requests_over_loopback() {
        let (mut server, addr) = started().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let block = BlockCodec::encode(b"over the wire").unwrap();

        write_message(&mut stream, &NodeRequest::store(BlockId(8), block.payload.clone()))
            .await
            .unwrap();
        let rsp: NodeResponse = read_message(&mut stream).await.unwrap();
        assert_eq!(rsp.status, ResponseStatus::Ok);

        write_message(&mut stream, &NodeRequest::fetch(BlockId(8))).await.unwrap();
        let rsp: NodeResponse = read_message(&mut stream).await.unwrap();
        assert_eq!(rsp.payload.unwrap(), block.payload);

        write_message(&mut stream, &NodeRequest::heartbeat()).await.unwrap();
        let rsp: NodeResponse = read_message(&mut stream).await.unwrap();
        let ids = NodeResponse::decode_block_list(&rsp.payload.unwrap()).unwrap();
        assert_eq!(ids, vec![BlockId(8)]);

        server.stop().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_garbage_request_closes_connection() {
        let (mut server, addr) = started().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &[0xEE]).await.unwrap();
        let next: Result<NodeResponse, NetError> = read_message(&mut stream).await;
        assert!(matches!(next, Err(NetError::ConnectionClosed)));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_refuses_new_work() {
        let (mut server, addr) = started().await;
        server.stop().await;
        let mut stream = match TcpStream::connect(addr).await {
            Ok(s) => s,
            Err(_) => return,
        };
        let _ = write_message(&mut stream, &NodeRequest::heartbeat()).await;
        let rsp: Result<NodeResponse, NetError> = read_message(&mut stream).await;
        assert!(rsp.is_err());
    }
}
