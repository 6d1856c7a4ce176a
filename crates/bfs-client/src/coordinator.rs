//! File-level operations over replicated blocks.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bfs_cluster::{NodeRegistry, ReplicaPlacer};
use bfs_config::{Config, ConfigManager};
use bfs_namespace::{
    BlockRef, Entry, FileEntry, ListEntry, NamespaceStore, PathResolver, ReplicationPolicy,
};
use bfs_proto::BlockCodec;
use bfs_types::status_code::{ClientCode, NamespaceCode, StatusCode, StorageCode};
use bfs_types::{make_error_msg, BlockId, NodeId, Result, Status};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::node_client::{NodeClient, TcpNodeClient};
use crate::write::{join_error, BlockWriter, WriteLedger};

/// Reconcile gives up on a node-side delete after this many passes.
pub const MAX_RECONCILE_ATTEMPTS: u32 = 32;

#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Falls back to the configured default policy.
    pub policy: Option<ReplicationPolicy>,
    /// Replace an existing file instead of failing with ALREADY_EXISTS.
    pub overwrite: bool,
}

impl PutOptions {
    pub fn with_policy(policy: ReplicationPolicy) -> Self {
        Self {
            policy: Some(policy),
            overwrite: false,
        }
    }

    pub fn overwrite(mut self) -> Self {
        self.overwrite = true;
        self
    }
}

/// Where one block of a file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocation {
    pub block_id: BlockId,
    pub offset: u64,
    pub length: u64,
    /// Node addresses, in the order recorded for the block.
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedFile {
    pub path: String,
    pub length: u64,
    pub policy: ReplicationPolicy,
    pub blocks: Vec<BlockLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingDelete {
    pub node_id: NodeId,
    pub block_id: BlockId,
    pub attempts: u32,
}

pub(crate) struct Inner {
    pub(crate) namespace: Arc<NamespaceStore>,
    pub(crate) registry: Arc<NodeRegistry>,
    pub(crate) placer: ReplicaPlacer,
    pub(crate) clients: DashMap<NodeId, Arc<dyn NodeClient>>,
    /// Per-node call slots for clients that bound their in-flight calls.
    node_slots: DashMap<NodeId, Arc<Semaphore>>,
    pub(crate) config: ConfigManager<ClientConfig>,
    transfers: Semaphore,
    pub(crate) pending_deletes: Mutex<VecDeque<PendingDelete>>,
    delete_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    pub(crate) fn config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config.get())
    }

    fn client(&self, node_id: NodeId) -> Result<Arc<dyn NodeClient>> {
        self.clients
            .get(&node_id)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| {
                Status::with_message(
                    StorageCode::NODE_UNREACHABLE,
                    format!("no client for node {}", node_id),
                )
            })
    }

    /// Run one node call under a transfer permit and `timeout`, and feed the
    /// outcome into the node's liveness record. Waiting for a slot on the
    /// node or for a transfer permit happens before the timeout starts.
    pub(crate) async fn call_node<T, F, Fut>(
        &self,
        node_id: NodeId,
        timeout: Duration,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<dyn NodeClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = self.client(node_id)?;
        let slot = self.node_slots.get(&node_id).map(|s| Arc::clone(s.value()));
        let _slot = match slot {
            Some(slot) => Some(slot.acquire_owned().await.map_err(|_| {
                Status::with_message(StatusCode::CANCELED, "node slot limiter closed")
            })?),
            None => None,
        };
        let _permit = self.transfers.acquire().await.map_err(|_| {
            Status::with_message(StatusCode::CANCELED, "transfer limiter closed")
        })?;
        let res = match tokio::time::timeout(timeout, f(client)).await {
            Ok(res) => res,
            Err(_) => make_error_msg(
                StatusCode::TIMEOUT,
                format!("node {} did not answer within {:?}", node_id, timeout),
            ),
        };
        match &res {
            Ok(_) => self.registry.record_success(node_id),
            Err(e)
                if matches!(e.code(), StatusCode::TIMEOUT | StorageCode::NODE_UNREACHABLE) =>
            {
                self.registry.record_timeout(node_id);
            }
            Err(_) => self.registry.record_success(node_id),
        }
        res
    }

    /// Fetch a block from the first replica that returns verified bytes.
    /// Yields the frame as well so repair can copy it verbatim.
    pub(crate) async fn read_block(&self, block: &BlockRef) -> Result<(Bytes, Bytes)> {
        let config = self.config();
        let candidates = self.placer.read_order(&block.nodes);
        let mut last_err: Option<Status> = None;
        for node_id in candidates {
            let block_id = block.block_id;
            let res = self
                .call_node(node_id, config.rpc_timeout, |client| async move {
                    client.fetch(block_id).await
                })
                .await
                .and_then(|frame| {
                    let data = BlockCodec::verify(&frame, block.checksum)?;
                    if data.len() as u64 != block.length {
                        return make_error_msg(
                            StorageCode::CHECKSUM_MISMATCH,
                            format!("length {} != recorded {}", data.len(), block.length),
                        );
                    }
                    Ok((frame, data))
                });
            match res {
                Ok(found) => return Ok(found),
                Err(e) => {
                    warn!(block_id = %block_id, node_id = %node_id, error = %e, "replica read failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        let reason = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no live replica".to_string());
        make_error_msg(
            ClientCode::BLOCK_UNAVAILABLE,
            format!("block {}: {}", block.block_id, reason),
        )
    }

    /// Delete one replica. A replica that is already gone counts as deleted.
    pub(crate) async fn delete_replica(&self, node_id: NodeId, block_id: BlockId) -> Result<()> {
        let timeout = self.config().rpc_timeout;
        let res = self
            .call_node(node_id, timeout, |client| async move {
                client.delete(block_id).await
            })
            .await;
        match res {
            Ok(()) => {}
            Err(e) if e.code() == StorageCode::BLOCK_NOT_FOUND => {}
            Err(e) => return Err(e),
        }
        self.registry.note_block_removed(node_id, block_id);
        Ok(())
    }

    pub(crate) fn enqueue_delete(&self, pending: PendingDelete) {
        self.pending_deletes.lock().push_back(pending);
    }

    /// Issue node-side deletes in the background. Failures land in the
    /// reconcile queue; the caller never waits on them.
    pub(crate) fn schedule_deletes(self: &Arc<Self>, replicas: Vec<(BlockId, Vec<NodeId>)>) {
        if replicas.is_empty() {
            return;
        }
        let inner = self.clone();
        let handle = tokio::spawn(async move {
            for (block_id, nodes) in replicas {
                for node_id in nodes {
                    if let Err(e) = inner.delete_replica(node_id, block_id).await {
                        warn!(block_id = %block_id, node_id = %node_id, error = %e, "replica delete failed, queued");
                        inner.enqueue_delete(PendingDelete {
                            node_id,
                            block_id,
                            attempts: 1,
                        });
                    }
                }
            }
        });
        let mut tasks = self.delete_tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    async fn write_blocks(
        self: &Arc<Self>,
        data: Bytes,
        policy: ReplicationPolicy,
        ledger: &WriteLedger,
    ) -> Result<Vec<BlockRef>> {
        let config = self.config();
        let chunks = BlockCodec::new(policy.block_size).split(&data);
        let mut set = JoinSet::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let writer = BlockWriter::new(
                self.clone(),
                config.clone(),
                policy,
                self.namespace.alloc_block_id(),
                BlockCodec::encode(chunk)?,
                ledger.clone(),
            );
            set.spawn(async move { writer.run().await.map(|block| (index, block)) });
        }

        let mut blocks: Vec<Option<BlockRef>> = vec![None; chunks.len()];
        while let Some(joined) = set.join_next().await {
            let (index, block) = joined.map_err(join_error)??;
            blocks[index] = Some(block);
        }
        Ok(blocks.into_iter().flatten().collect())
    }
}

/// Entry point for file operations. Cheap to clone.
#[derive(Clone)]
pub struct StorageCoordinator {
    pub(crate) inner: Arc<Inner>,
}

impl StorageCoordinator {
    pub fn new(
        config: ClientConfig,
        namespace: Arc<NamespaceStore>,
        registry: Arc<NodeRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let transfers = Semaphore::new(config.max_parallel_transfers);
        let inner = Inner {
            namespace,
            placer: ReplicaPlacer::new(registry.clone()),
            registry,
            clients: DashMap::new(),
            node_slots: DashMap::new(),
            config: ConfigManager::new(config),
            transfers,
            pending_deletes: Mutex::new(VecDeque::new()),
            delete_tasks: Mutex::new(Vec::new()),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Build a coordinator with an empty namespace and a TCP client for
    /// every configured node.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let registry = NodeRegistry::new(config.cluster.clone()).into_arc();
        let nodes = config.nodes.clone();
        let coordinator = Self::new(config, Arc::new(NamespaceStore::new()), registry)?;
        for node in nodes {
            let client = Arc::new(TcpNodeClient::new(node.node_id, node.address.clone()));
            coordinator.add_node(node.node_id, node.address, node.rack, client);
        }
        Ok(coordinator)
    }

    /// Register a node and the client used to reach it.
    pub fn add_node(
        &self,
        node_id: NodeId,
        address: impl Into<String>,
        rack: Option<String>,
        client: Arc<dyn NodeClient>,
    ) {
        self.inner.registry.register(node_id, address, rack);
        match client.max_inflight() {
            Some(limit) => {
                self.inner
                    .node_slots
                    .insert(node_id, Arc::new(Semaphore::new(limit.max(1))));
            }
            None => {
                self.inner.node_slots.remove(&node_id);
            }
        }
        self.inner.clients.insert(node_id, client);
    }

    pub fn namespace(&self) -> &Arc<NamespaceStore> {
        &self.inner.namespace
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> Arc<ClientConfig> {
        self.inner.config()
    }

    /// Validate and swap in a new client config.
    pub fn update_config(&self, config: ClientConfig) -> Result<()> {
        self.inner.config.update(config)?;
        Ok(())
    }

    pub fn default_replication(&self) -> u32 {
        self.inner.config().default_policy.replication
    }

    /// Store `data` at `path`. The file only becomes visible once every block
    /// is finalized; on failure nothing is published and written replicas are
    /// reclaimed in the background.
    pub async fn put_file(&self, data: Bytes, path: &str, opts: PutOptions) -> Result<FileEntry> {
        let config = self.inner.config();
        let policy = opts.policy.unwrap_or(config.default_policy);
        policy.validate()?;
        let path = self.inner.namespace.check_writable(path, opts.overwrite)?;

        let _guard = self.inner.namespace.lock_path(&path).await?;
        self.inner.namespace.check_writable(&path, opts.overwrite)?;

        let ledger = WriteLedger::default();
        let len = data.len();
        let written = tokio::time::timeout(
            config.operation_timeout,
            self.inner.write_blocks(data, policy, &ledger),
        )
        .await
        .unwrap_or_else(|_| {
            make_error_msg(
                ClientCode::OPERATION_TIMEOUT,
                format!("put {} exceeded {:?}", path, config.operation_timeout),
            )
        });

        let committed = written.and_then(|blocks| {
            let replaced =
                self.inner
                    .namespace
                    .commit_file(&path, policy, blocks.clone(), opts.overwrite)?;
            Ok((blocks, replaced))
        });
        match committed {
            Ok((blocks, replaced)) => {
                self.inner.schedule_deletes(ledger.strays(&blocks));
                if let Some(old) = replaced {
                    self.inner.schedule_deletes(replica_sets(&old.blocks));
                }
                info!(path = %path, bytes = len, blocks = blocks.len(), "put_file");
                match self.inner.namespace.stat(&path)? {
                    Entry::File(f) => Ok(f),
                    Entry::Dir(_) => make_error_msg(NamespaceCode::IS_DIRECTORY, path),
                }
            }
            Err(e) => {
                error!(path = %path, error = %e, "put_file failed");
                self.inner.schedule_deletes(ledger.strays(&[]));
                Err(e)
            }
        }
    }

    /// Read a whole file, falling through to other replicas on any
    /// per-replica failure.
    pub async fn get_file(&self, path: &str) -> Result<Bytes> {
        let file = match self.inner.namespace.stat(path)? {
            Entry::File(f) => f,
            Entry::Dir(d) => return make_error_msg(NamespaceCode::IS_DIRECTORY, d.path),
        };
        let timeout = self.inner.config().operation_timeout;
        tokio::time::timeout(timeout, self.read_file(&file))
            .await
            .unwrap_or_else(|_| {
                make_error_msg(
                    ClientCode::OPERATION_TIMEOUT,
                    format!("get {} exceeded {:?}", file.path, timeout),
                )
            })
    }

    async fn read_file(&self, file: &FileEntry) -> Result<Bytes> {
        let mut set = JoinSet::new();
        for (index, block) in file.blocks.iter().cloned().enumerate() {
            let inner = self.inner.clone();
            set.spawn(async move {
                let (_, data) = inner.read_block(&block).await?;
                Ok::<_, Status>((index, data))
            });
        }
        let mut parts: Vec<Bytes> = vec![Bytes::new(); file.blocks.len()];
        while let Some(joined) = set.join_next().await {
            let (index, data) = joined.map_err(join_error)??;
            parts[index] = data;
        }

        let mut out = BytesMut::with_capacity(file.length as usize);
        for part in parts {
            out.extend_from_slice(&part);
        }
        if out.len() as u64 != file.length {
            return make_error_msg(
                ClientCode::CORRUPT_FILE,
                format!("{}: read {} bytes, expected {}", file.path, out.len(), file.length),
            );
        }
        debug!(path = %file.path, bytes = out.len(), "get_file");
        Ok(out.freeze())
    }

    /// Remove `path` from the namespace, then reclaim its replicas in the
    /// background.
    pub async fn delete_file(&self, path: &str, recursive: bool) -> Result<()> {
        let _guard = self.inner.namespace.lock_path(path).await?;
        let blocks = self.inner.namespace.delete(path, recursive)?;
        self.inner.schedule_deletes(replica_sets(&blocks));
        Ok(())
    }

    pub async fn rename_file(&self, src: &str, dst: &str) -> Result<()> {
        let mut paths = [
            PathResolver::normalize(src)?,
            PathResolver::normalize(dst)?,
        ];
        paths.sort();
        let _first = self.inner.namespace.lock_path(&paths[0]).await?;
        let _second = if paths[0] != paths[1] {
            Some(self.inner.namespace.lock_path(&paths[1]).await?)
        } else {
            None
        };
        self.inner.namespace.rename(src, dst)
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<ListEntry>> {
        self.inner.namespace.list(path)
    }

    /// Files at or below `path` with the hosts of every block.
    pub fn list_files(&self, path: &str, recursive: bool) -> Result<Vec<LocatedFile>> {
        let files = self.inner.namespace.walk_files(path, recursive)?;
        Ok(files
            .into_iter()
            .map(|f| LocatedFile {
                blocks: f
                    .block_offsets()
                    .map(|(offset, block)| BlockLocation {
                        block_id: block.block_id,
                        offset,
                        length: block.length,
                        hosts: block
                            .nodes
                            .iter()
                            .filter_map(|n| self.inner.registry.address(*n))
                            .collect(),
                    })
                    .collect(),
                path: f.path,
                length: f.length,
                policy: f.policy,
            })
            .collect())
    }

    pub fn stat(&self, path: &str) -> Result<Entry> {
        self.inner.namespace.stat(path)
    }

    pub fn mkdirs(&self, path: &str) -> Result<()> {
        self.inner.namespace.mkdirs(path)
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        self.inner.namespace.exists(path)
    }

    /// Node-side deletes waiting for the next reconcile pass.
    pub fn pending_deletes(&self) -> usize {
        self.inner.pending_deletes.lock().len()
    }

    /// Wait for every background delete issued so far.
    pub async fn drain_deletes(&self) {
        let tasks = std::mem::take(&mut *self.inner.delete_tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}

fn replica_sets(blocks: &[BlockRef]) -> Vec<(BlockId, Vec<NodeId>)> {
    blocks
        .iter()
        .map(|b| (b.block_id, b.nodes.clone()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{QuorumPolicy, WriteMode};
    use crate::local_client::LocalNodeClient;
    use bfs_cluster::ClusterConfig;
    use rand::RngCore;

    pub(crate) const MIB: usize = 1 << 20;

    pub(crate) struct Cluster {
        pub coord: StorageCoordinator,
        pub nodes: Vec<Arc<LocalNodeClient>>,
    }

    impl Cluster {
        pub fn node(&self, id: NodeId) -> &Arc<LocalNodeClient> {
            &self.nodes[(id.0 - 1) as usize]
        }
    }

    pub(crate) fn test_config() -> ClientConfig {
        ClientConfig {
            rpc_timeout: Duration::from_millis(200),
            operation_timeout: Duration::from_secs(10),
            retry_init_wait: Duration::from_millis(1),
            retry_max_wait: Duration::from_millis(5),
            ..ClientConfig::default()
        }
    }

    pub(crate) fn cluster_with(config: ClientConfig, n: u32) -> Cluster {
        let registry = NodeRegistry::new(ClusterConfig::default()).into_arc();
        let coord =
            StorageCoordinator::new(config, Arc::new(NamespaceStore::new()), registry).unwrap();
        let nodes: Vec<Arc<LocalNodeClient>> = (1..=n)
            .map(|id| Arc::new(LocalNodeClient::in_memory(NodeId(id), 1 << 30)))
            .collect();
        for node in &nodes {
            let id = node.node_id();
            coord.add_node(id, format!("10.0.0.{}:9100", id.0), None, node.clone());
        }
        Cluster { coord, nodes }
    }

    pub(crate) fn cluster(n: u32) -> Cluster {
        cluster_with(test_config(), n)
    }

    pub(crate) fn random_bytes(len: usize) -> Bytes {
        let mut buf = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut buf);
        Bytes::from(buf)
    }

    fn policy(replication: u32, block_size: u64) -> PutOptions {
        PutOptions::with_policy(ReplicationPolicy::new(replication, block_size))
    }

    fn file(entry: Entry) -> FileEntry {
        entry.as_file().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_ten_mib_over_five_nodes() {
        let c = cluster(5);
        let data = random_bytes(10 * MIB);
        let entry = c
            .coord
            .put_file(data.clone(), "/big", policy(3, 4 * MIB as u64))
            .await
            .unwrap();

        let lengths: Vec<u64> = entry.blocks.iter().map(|b| b.length).collect();
        assert_eq!(lengths, vec![4 * MIB as u64, 4 * MIB as u64, 2 * MIB as u64]);
        for block in &entry.blocks {
            assert_eq!(block.nodes.len(), 3);
            let mut distinct = block.nodes.clone();
            distinct.sort();
            distinct.dedup();
            assert_eq!(distinct.len(), 3);
        }
        assert_eq!(c.coord.stat("/big").unwrap().length(), 10 * MIB as u64);
        assert_eq!(c.coord.get_file("/big").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_round_trip_shapes() {
        let c = cluster(3);
        for (i, (len, block_size, replication)) in [
            (0usize, 16u64, 1u32),
            (1, 16, 1),
            (16, 16, 2),
            (17, 16, 3),
            (1000, 7, 2),
            (4096, 4096, 3),
        ]
        .into_iter()
        .enumerate()
        {
            let path = format!("/f{}", i);
            let data = random_bytes(len);
            c.coord
                .put_file(data.clone(), &path, policy(replication, block_size))
                .await
                .unwrap();
            assert_eq!(c.coord.get_file(&path).await.unwrap(), data, "case {}", i);
        }
    }

    #[tokio::test]
    async fn test_create_then_stat_keeps_policy() {
        let c = cluster(3);
        let p = ReplicationPolicy::new(2, 1024);
        c.coord.namespace().create_file("/empty", p).unwrap();
        let f = file(c.coord.stat("/empty").unwrap());
        assert_eq!(f.policy, p);
        assert_eq!(f.length, 0);
        assert!(c.coord.get_file("/empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checksum_fallthrough() {
        let c = cluster(3);
        let data = random_bytes(100);
        let entry = c
            .coord
            .put_file(data.clone(), "/f", policy(3, 64))
            .await
            .unwrap();
        for block in &entry.blocks {
            let preferred = c.coord.inner.placer.read_order(&block.nodes)[0];
            c.node(preferred).corrupt_block(block.block_id);
        }
        assert_eq!(c.coord.get_file("/f").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_unreachable_replica_fallthrough() {
        let c = cluster(3);
        let data = random_bytes(300);
        c.coord.put_file(data.clone(), "/f", policy(3, 128)).await.unwrap();
        c.nodes[0].set_unreachable(true);
        c.nodes[1].set_unreachable(true);
        assert_eq!(c.coord.get_file("/f").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_all_replicas_bad_is_unavailable() {
        let c = cluster(2);
        let entry = c
            .coord
            .put_file(random_bytes(10), "/f", policy(2, 64))
            .await
            .unwrap();
        let id = entry.blocks[0].block_id;
        for node in &c.nodes {
            node.corrupt_block(id);
        }
        let err = c.coord.get_file("/f").await.unwrap_err();
        assert_eq!(err.code(), ClientCode::BLOCK_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_strict_quorum_failure_publishes_nothing() {
        let c = cluster(3);
        c.nodes[2].set_unreachable(true);
        let err = c
            .coord
            .put_file(random_bytes(64), "/f", policy(3, 32))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ClientCode::WRITE_QUORUM_FAILED);
        assert!(!c.coord.exists("/f").unwrap());

        c.coord.drain_deletes().await;
        assert!(c.nodes[0].service().store().is_empty());
        assert!(c.nodes[1].service().store().is_empty());
    }

    #[tokio::test]
    async fn test_strict_retry_uses_spare_node() {
        let c = cluster(4);
        // Node 1 is least loaded, so it is picked first and then replaced.
        c.nodes[0].set_unreachable(true);
        let data = random_bytes(50);
        let entry = c
            .coord
            .put_file(data.clone(), "/f", policy(3, 64))
            .await
            .unwrap();
        assert_eq!(entry.blocks[0].nodes.len(), 3);
        assert!(!entry.blocks[0].nodes.contains(&NodeId(1)));
        assert_eq!(c.coord.get_file("/f").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_lenient_finalizes_reduced() {
        let c = cluster_with(
            ClientConfig {
                write_mode: WriteMode::Lenient,
                ..test_config()
            },
            3,
        );
        c.nodes[2].set_unreachable(true);
        let data = random_bytes(64);
        let entry = c
            .coord
            .put_file(data.clone(), "/f", policy(3, 64))
            .await
            .unwrap();
        assert_eq!(entry.blocks[0].nodes.len(), 2);
        assert!(entry.is_under_replicated());
        assert_eq!(c.coord.get_file("/f").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_majority_quorum() {
        let c = cluster_with(
            ClientConfig {
                quorum: QuorumPolicy::Majority,
                ..test_config()
            },
            3,
        );
        c.nodes[0].set_unreachable(true);
        let entry = c
            .coord
            .put_file(random_bytes(10), "/f", policy(3, 64))
            .await
            .unwrap();
        assert_eq!(entry.blocks[0].nodes.len(), 2);

        c.nodes[1].set_unreachable(true);
        let err = c
            .coord
            .put_file(random_bytes(10), "/g", policy(3, 64))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ClientCode::WRITE_QUORUM_FAILED);
    }

    #[tokio::test]
    async fn test_insufficient_nodes() {
        let c = cluster(2);
        let err = c
            .coord
            .put_file(random_bytes(10), "/f", policy(3, 64))
            .await
            .unwrap_err();
        assert_eq!(err.code(), bfs_types::ClusterCode::INSUFFICIENT_NODES);
    }

    #[tokio::test]
    async fn test_put_structural_errors() {
        let c = cluster(3);
        c.coord.mkdirs("/d").unwrap();
        let err = c
            .coord
            .put_file(random_bytes(1), "/d", PutOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), NamespaceCode::IS_DIRECTORY);
        let err = c
            .coord
            .put_file(random_bytes(1), "/missing/f", PutOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), NamespaceCode::NOT_FOUND);
        let err = c
            .coord
            .put_file(random_bytes(1), "no-slash", PutOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), NamespaceCode::INVALID_PATH);
        let err = c.coord.get_file("/d").await.unwrap_err();
        assert_eq!(err.code(), NamespaceCode::IS_DIRECTORY);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_and_reclaims() {
        let c = cluster(3);
        let old = c
            .coord
            .put_file(random_bytes(100), "/f", policy(3, 64))
            .await
            .unwrap();
        let err = c
            .coord
            .put_file(random_bytes(10), "/f", policy(3, 64))
            .await
            .unwrap_err();
        assert_eq!(err.code(), NamespaceCode::ALREADY_EXISTS);

        let data = random_bytes(10);
        c.coord
            .put_file(data.clone(), "/f", policy(3, 64).overwrite())
            .await
            .unwrap();
        assert_eq!(c.coord.get_file("/f").await.unwrap(), data);

        c.coord.drain_deletes().await;
        for block in &old.blocks {
            for node in &c.nodes {
                assert!(!node.service().store().contains(block.block_id));
            }
        }
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let c = cluster(3);
        let entry = c
            .coord
            .put_file(random_bytes(200), "/f", policy(2, 64))
            .await
            .unwrap();
        c.coord.delete_file("/f", false).await.unwrap();
        let err = c.coord.delete_file("/f", false).await.unwrap_err();
        assert_eq!(err.code(), NamespaceCode::NOT_FOUND);

        c.coord.drain_deletes().await;
        for block in &entry.blocks {
            for node in &c.nodes {
                assert!(!node.service().store().contains(block.block_id));
            }
        }
        assert_eq!(c.coord.pending_deletes(), 0);
    }

    #[tokio::test]
    async fn test_delete_never_blocks_on_nodes() {
        let c = cluster(3);
        c.coord.put_file(random_bytes(10), "/f", policy(3, 64)).await.unwrap();
        for node in &c.nodes {
            node.set_unreachable(true);
        }
        c.coord.delete_file("/f", false).await.unwrap();
        assert!(!c.coord.exists("/f").unwrap());
        c.coord.drain_deletes().await;
        assert_eq!(c.coord.pending_deletes(), 3);
    }

    #[tokio::test]
    async fn test_recursive_delete() {
        let c = cluster(3);
        c.coord.mkdirs("/a/b").unwrap();
        c.coord.put_file(random_bytes(10), "/a/b/f", policy(1, 64)).await.unwrap();
        let err = c.coord.delete_file("/a", false).await.unwrap_err();
        assert_eq!(err.code(), NamespaceCode::NOT_EMPTY);
        c.coord.delete_file("/a", true).await.unwrap();
        assert!(!c.coord.exists("/a/b/f").unwrap());
    }

    #[tokio::test]
    async fn test_rename_and_read() {
        let c = cluster(3);
        c.coord.mkdirs("/src").unwrap();
        c.coord.mkdirs("/dst").unwrap();
        let data = random_bytes(90);
        c.coord.put_file(data.clone(), "/src/f", policy(2, 32)).await.unwrap();
        c.coord.rename_file("/src/f", "/dst/g").await.unwrap();
        assert!(!c.coord.exists("/src/f").unwrap());
        assert_eq!(c.coord.get_file("/dst/g").await.unwrap(), data);

        let err = c.coord.rename_file("/nope", "/x").await.unwrap_err();
        assert_eq!(err.code(), NamespaceCode::NOT_FOUND);
        c.coord.put_file(random_bytes(1), "/src/h", policy(1, 32)).await.unwrap();
        let err = c.coord.rename_file("/src/h", "/dst/g").await.unwrap_err();
        assert_eq!(err.code(), NamespaceCode::ALREADY_EXISTS);
    }

    #[tokio::test]
    async fn test_list_files_with_locations() {
        let c = cluster(3);
        c.coord.mkdirs("/data/sub").unwrap();
        c.coord.put_file(random_bytes(100), "/data/a", policy(2, 64)).await.unwrap();
        c.coord.put_file(random_bytes(10), "/data/sub/b", policy(1, 64)).await.unwrap();

        let flat = c.coord.list_files("/data", false).unwrap();
        assert_eq!(flat.len(), 1);
        let a = &flat[0];
        assert_eq!(a.path, "/data/a");
        assert_eq!(a.blocks.len(), 2);
        assert_eq!(a.blocks[1].offset, 64);
        assert_eq!(a.blocks[1].length, 36);
        assert_eq!(a.blocks[0].hosts.len(), 2);
        assert!(a.blocks[0].hosts[0].starts_with("10.0.0."));

        let all = c.coord.list_files("/data", true).unwrap();
        let paths: Vec<&str> = all.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/data/a", "/data/sub/b"]);

        let listing = c.coord.list_dir("/data").unwrap();
        assert_eq!(listing.len(), 2);
        let a = listing.iter().find(|e| e.name == "a").unwrap();
        assert!(!a.is_dir);
        assert_eq!(a.length, 100);
        assert_eq!(a.replica_locations.len(), 2);
        assert!(listing.iter().any(|e| e.name == "sub" && e.is_dir));
    }

    #[tokio::test]
    async fn test_operation_timeout() {
        let c = cluster_with(
            ClientConfig {
                rpc_timeout: Duration::from_secs(5),
                operation_timeout: Duration::from_millis(50),
                ..test_config()
            },
            1,
        );
        c.nodes[0].set_delay(Some(Duration::from_millis(500)));
        let err = c
            .coord
            .put_file(random_bytes(10), "/f", policy(1, 64))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ClientCode::OPERATION_TIMEOUT);
        assert!(!c.coord.exists("/f").unwrap());
    }

    #[tokio::test]
    async fn test_rpc_timeout_marks_suspect() {
        let c = cluster(4);
        c.nodes[0].set_delay(Some(Duration::from_millis(500)));
        c.coord.put_file(random_bytes(10), "/f", policy(3, 64)).await.unwrap();
        assert_eq!(
            c.coord.registry().state(NodeId(1)),
            Some(bfs_cluster::NodeState::Suspect)
        );
    }

    #[tokio::test]
    async fn test_queued_calls_do_not_count_as_timeouts() {
        let config = ClientConfig {
            rpc_timeout: Duration::from_millis(100),
            ..test_config()
        };
        let registry = NodeRegistry::new(ClusterConfig::default()).into_arc();
        let coord =
            StorageCoordinator::new(config, Arc::new(NamespaceStore::new()), registry).unwrap();
        let node = Arc::new(LocalNodeClient::in_memory(NodeId(1), 1 << 30).with_max_inflight(1));
        coord.add_node(NodeId(1), "10.0.0.1:9100", None, node.clone());
        node.set_delay(Some(Duration::from_millis(40)));

        // Eight blocks on a one-call-at-a-time node: the last one waits far
        // longer than rpc_timeout, but only its own call is timed.
        let data = random_bytes(8 * 16);
        coord.put_file(data.clone(), "/queued", policy(1, 16)).await.unwrap();
        assert_eq!(
            coord.registry().state(NodeId(1)),
            Some(bfs_cluster::NodeState::Live)
        );
        node.set_delay(None);
        assert_eq!(coord.get_file("/queued").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_oversized_block_size_rejected_without_touching_nodes() {
        let c = cluster(3);
        let err = c
            .coord
            .put_file(
                random_bytes(10),
                "/huge",
                policy(3, bfs_namespace::MAX_BLOCK_SIZE + 1),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);
        assert!(!c.coord.exists("/huge").unwrap());
        for id in 1..=3 {
            assert_eq!(
                c.coord.registry().state(NodeId(id)),
                Some(bfs_cluster::NodeState::Live)
            );
        }

        let mut cfg = (*c.coord.config()).clone();
        cfg.default_policy = ReplicationPolicy::new(3, bfs_namespace::MAX_BLOCK_SIZE + 1);
        let err = c.coord.update_config(cfg).unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_CONFIG);
    }

    #[tokio::test]
    async fn test_concurrent_puts_same_path_serialize() {
        let c = cluster(3);
        let a = c.coord.clone();
        let b = c.coord.clone();
        let (ra, rb) = tokio::join!(
            a.put_file(random_bytes(100), "/same", policy(2, 16)),
            b.put_file(random_bytes(100), "/same", policy(2, 16)),
        );
        assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);
        let err = ra.err().or(rb.err()).unwrap();
        assert_eq!(err.code(), NamespaceCode::ALREADY_EXISTS);
    }

    #[tokio::test]
    async fn test_default_replication_and_hot_update() {
        let c = cluster(3);
        assert_eq!(c.coord.default_replication(), 3);
        let mut cfg = (*c.coord.config()).clone();
        cfg.default_policy = ReplicationPolicy::new(2, 1024);
        c.coord.update_config(cfg).unwrap();
        assert_eq!(c.coord.default_replication(), 2);

        let mut bad = (*c.coord.config()).clone();
        bad.rpc_timeout = Duration::ZERO;
        let err = c.coord.update_config(bad).unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_CONFIG);
    }

    #[tokio::test]
    async fn test_over_tcp() {
        use bfs_storage_node::{NodeServer, StorageNodeService};

        let mut servers = Vec::new();
        let mut endpoints = Vec::new();
        for id in 1..=3u32 {
            let mut server = NodeServer::new(StorageNodeService::in_memory(NodeId(id), 1 << 24));
            let addr = server.start("127.0.0.1:0").await.unwrap();
            endpoints.push(crate::config::NodeEndpoint {
                node_id: NodeId(id),
                address: addr.to_string(),
                rack: None,
            });
            servers.push(server);
        }
        let coord = StorageCoordinator::connect(ClientConfig {
            nodes: endpoints,
            ..test_config()
        })
        .unwrap();
        let data = random_bytes(5000);
        coord.put_file(data.clone(), "/net", policy(3, 1024)).await.unwrap();
        assert_eq!(coord.get_file("/net").await.unwrap(), data);
        coord.delete_file("/net", false).await.unwrap();
        coord.drain_deletes().await;
        for server in &servers {
            assert!(server.service().store().is_empty());
        }
        for server in &mut servers {
            server.stop().await;
        }
    }
}
