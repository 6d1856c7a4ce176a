//! Replicated write of a single block.
//!
//! A block moves `Pending -> Writing -> Quorumed -> Finalized`. A round that
//! falls short of quorum moves it to `Failed`, from where it either goes back
//! to `Writing` against replacement nodes or, once the retry budget is spent,
//! ends there (strict) or is finalized with fewer replicas (lenient).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use bfs_namespace::{BlockRef, ReplicationPolicy};
use bfs_proto::EncodedBlock;
use bfs_types::status_code::{ClientCode, ClusterCode, StatusCode};
use bfs_types::{BlockId, NodeId, Result, Status};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, WriteMode};
use crate::coordinator::Inner;
use crate::retry::ExponentialBackoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockWriteState {
    Pending,
    Writing,
    Quorumed,
    Finalized,
    Failed,
}

impl fmt::Display for BlockWriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockWriteState::Pending => "pending",
            BlockWriteState::Writing => "writing",
            BlockWriteState::Quorumed => "quorumed",
            BlockWriteState::Finalized => "finalized",
            BlockWriteState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Every (block, node) pair a STORE was sent for, whatever its outcome. A
/// timed-out store may still have landed, so cleanup works from this set
/// rather than from acknowledgements.
#[derive(Debug, Clone, Default)]
pub(crate) struct WriteLedger(Arc<Mutex<BTreeMap<BlockId, BTreeSet<NodeId>>>>);

impl WriteLedger {
    fn record(&self, block_id: BlockId, node_id: NodeId) {
        self.0.lock().entry(block_id).or_default().insert(node_id);
    }

    /// Replicas that were attempted but are not part of `kept`.
    pub(crate) fn strays(&self, kept: &[BlockRef]) -> Vec<(BlockId, Vec<NodeId>)> {
        let committed: BTreeMap<BlockId, &[NodeId]> = kept
            .iter()
            .map(|b| (b.block_id, b.nodes.as_slice()))
            .collect();
        self.0
            .lock()
            .iter()
            .filter_map(|(block_id, nodes)| {
                let keep = committed.get(block_id).copied().unwrap_or(&[]);
                let strays: Vec<NodeId> =
                    nodes.iter().filter(|n| !keep.contains(n)).copied().collect();
                (!strays.is_empty()).then_some((*block_id, strays))
            })
            .collect()
    }
}

pub(crate) struct BlockWriter {
    inner: Arc<Inner>,
    config: Arc<ClientConfig>,
    policy: ReplicationPolicy,
    block_id: BlockId,
    block: EncodedBlock,
    ledger: WriteLedger,
    state: BlockWriteState,
    acked: Vec<NodeId>,
    failed: Vec<NodeId>,
    /// Nodes that answered with a non-transient error; never retried.
    rejected: Vec<NodeId>,
}

impl BlockWriter {
    pub(crate) fn new(
        inner: Arc<Inner>,
        config: Arc<ClientConfig>,
        policy: ReplicationPolicy,
        block_id: BlockId,
        block: EncodedBlock,
        ledger: WriteLedger,
    ) -> Self {
        Self {
            inner,
            config,
            policy,
            block_id,
            block,
            ledger,
            state: BlockWriteState::Pending,
            acked: Vec::new(),
            failed: Vec::new(),
            rejected: Vec::new(),
        }
    }

    fn transition(&mut self, next: BlockWriteState) {
        debug!(
            block_id = %self.block_id,
            from = %self.state,
            to = %next,
            acked = self.acked.len(),
            "block write state"
        );
        self.state = next;
    }

    /// Nodes for the first round. Strict mode still proceeds with fewer
    /// targets than the replica count as long as they can form a quorum.
    fn initial_targets(&self, required: usize) -> Result<Vec<NodeId>> {
        let replication = self.policy.replication as usize;
        let targets = match self.inner.placer.place_block(&self.policy, &[]) {
            Ok(targets) => targets,
            Err(e) if e.code() == ClusterCode::INSUFFICIENT_NODES => {
                self.inner.placer.choose(replication, &[], &[])
            }
            Err(e) => return Err(e),
        };
        let usable = match self.config.write_mode {
            WriteMode::Strict => targets.len() >= required,
            WriteMode::Lenient => !targets.is_empty(),
        };
        if !usable {
            return Err(Status::with_message(
                ClusterCode::INSUFFICIENT_NODES,
                format!(
                    "block {}: need {} nodes, {} eligible",
                    self.block_id,
                    required,
                    targets.len()
                ),
            ));
        }
        if targets.len() < replication {
            warn!(
                block_id = %self.block_id,
                replication,
                targets = targets.len(),
                "placing block with reduced replication"
            );
        }
        Ok(targets)
    }

    /// Targets for a retry round: fresh nodes first, then nodes that failed
    /// transiently and are not Dead.
    fn replacement_targets(&self) -> Vec<NodeId> {
        let need = (self.policy.replication as usize).saturating_sub(self.acked.len());
        let mut targets = self.inner.placer.choose(need, &self.acked, &self.failed);
        for node in &self.failed {
            if targets.len() >= need {
                break;
            }
            if !targets.contains(node)
                && !self.acked.contains(node)
                && !self.rejected.contains(node)
                && self.inner.registry.is_available(*node)
            {
                targets.push(*node);
            }
        }
        targets
    }

    async fn write_round(&mut self, targets: &[NodeId]) {
        let mut set = JoinSet::new();
        for node_id in targets {
            let node_id = *node_id;
            self.ledger.record(self.block_id, node_id);
            let inner = self.inner.clone();
            let frame = self.block.payload.clone();
            let block_id = self.block_id;
            let timeout = self.config.rpc_timeout;
            set.spawn(async move {
                let res = inner
                    .call_node(node_id, timeout, |client| async move {
                        client.store(block_id, frame).await
                    })
                    .await;
                (node_id, res)
            });
        }
        while let Some(joined) = set.join_next().await {
            let Ok((node_id, res)) = joined else { continue };
            match res {
                Ok(()) => {
                    self.inner.registry.note_block_stored(node_id, self.block_id);
                    self.acked.push(node_id);
                    self.failed.retain(|n| *n != node_id);
                }
                Err(e) => {
                    warn!(block_id = %self.block_id, node_id = %node_id, error = %e, "replica write failed");
                    if !self.failed.contains(&node_id) {
                        self.failed.push(node_id);
                    }
                    if !e.is_transient() && !self.rejected.contains(&node_id) {
                        self.rejected.push(node_id);
                    }
                }
            }
        }
    }

    fn block_ref(&self) -> BlockRef {
        BlockRef {
            block_id: self.block_id,
            length: self.block.data_len() as u64,
            checksum: self.block.checksum,
            nodes: self.acked.clone(),
        }
    }

    /// Drive the block to `Finalized`, or fail with INSUFFICIENT_NODES or
    /// WRITE_QUORUM_FAILED.
    pub(crate) async fn run(mut self) -> Result<BlockRef> {
        let replication = self.policy.replication as usize;
        let required = self.config.quorum.required(replication).max(1);
        let mut targets = self.initial_targets(required)?;
        let mut backoff = ExponentialBackoff::new(
            self.config.retry_init_wait,
            self.config.retry_max_wait,
            self.config.operation_timeout,
        );

        for round in 0..=self.config.write_retry_budget {
            self.transition(BlockWriteState::Writing);
            self.write_round(&targets).await;
            if self.acked.len() >= required {
                self.transition(BlockWriteState::Quorumed);
                break;
            }
            self.transition(BlockWriteState::Failed);
            if round == self.config.write_retry_budget || !backoff.wait().await {
                break;
            }
            targets = self.replacement_targets();
            if targets.is_empty() {
                break;
            }
            debug!(block_id = %self.block_id, attempt = backoff.attempts(), targets = ?targets, "retrying block write");
        }

        match self.state {
            BlockWriteState::Quorumed => {}
            _ if self.config.write_mode == WriteMode::Lenient && !self.acked.is_empty() => {
                info!(
                    block_id = %self.block_id,
                    acked = self.acked.len(),
                    replication,
                    "finalizing under-replicated block, repair will top it up"
                );
            }
            _ => {
                return Err(Status::with_message(
                    ClientCode::WRITE_QUORUM_FAILED,
                    format!(
                        "block {}: {} of {} acks",
                        self.block_id,
                        self.acked.len(),
                        required
                    ),
                ));
            }
        }
        self.transition(BlockWriteState::Finalized);
        Ok(self.block_ref())
    }
}

/// Map a failed join of a block task to a status.
pub(crate) fn join_error(e: tokio::task::JoinError) -> Status {
    Status::with_message(StatusCode::CANCELED, format!("block task: {}", e))
}
