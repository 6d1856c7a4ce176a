//! Background passes: replica repair, delete reconciliation and heartbeat
//! polling.

use bfs_namespace::BlockRef;
use bfs_types::{BlockId, NodeId};
use bfs_utils::BackgroundRunner;
use tracing::{debug, error, info, warn};

use crate::coordinator::{PendingDelete, StorageCoordinator, MAX_RECONCILE_ATTEMPTS};

/// Outcome of one repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Blocks looked at.
    pub examined: usize,
    /// Blocks whose replica set was changed.
    pub repaired: usize,
    /// Blocks still under target after the pass.
    pub failed: usize,
}

impl StorageCoordinator {
    /// Bring every block back to its file's replica count. Missing replicas
    /// are copied from a verified healthy one and replace Dead holders.
    pub async fn repair(&self) -> RepairReport {
        let mut report = RepairReport::default();
        for file in self.inner.namespace.files() {
            let target = file.policy.replication as usize;
            for block in &file.blocks {
                report.examined += 1;
                match self.repair_block(block, target).await {
                    BlockRepair::Healthy => {}
                    BlockRepair::Repaired => report.repaired += 1,
                    BlockRepair::Short => report.failed += 1,
                }
            }
        }
        if report.repaired > 0 || report.failed > 0 {
            info!(
                examined = report.examined,
                repaired = report.repaired,
                failed = report.failed,
                "repair pass"
            );
        }
        report
    }

    /// A Dead holder leaves the replica list only once the block has a new
    /// copy in its place, so a block whose holders are all Dead keeps them
    /// and is readable again when they re-register. Dropped holders are
    /// queued for delete in case they come back.
    async fn repair_block(&self, block: &BlockRef, target: usize) -> BlockRepair {
        let inner = &self.inner;
        let (holders, dead): (Vec<NodeId>, Vec<NodeId>) = block
            .nodes
            .iter()
            .copied()
            .partition(|n| inner.registry.is_available(*n));
        if holders.len() >= target {
            if dead.is_empty() {
                return BlockRepair::Healthy;
            }
            return self.commit_repair(block, holders, Vec::new(), dead, target);
        }
        if holders.is_empty() {
            warn!(block_id = %block.block_id, dead = ?dead, "every holder is dead, keeping locations");
            return BlockRepair::Short;
        }

        let source = block.with_nodes(holders.clone());
        let frame = match inner.read_block(&source).await {
            Ok((frame, _)) => frame,
            Err(e) => {
                error!(block_id = %block.block_id, error = %e, "no healthy replica to repair from");
                return BlockRepair::Short;
            }
        };

        let timeout = inner.config().rpc_timeout;
        let need = target - holders.len();
        let candidates = inner.placer.choose(need, &holders, &block.nodes);
        let mut added = Vec::new();
        for node_id in candidates {
            let block_id = block.block_id;
            let frame = frame.clone();
            let res = inner
                .call_node(node_id, timeout, |client| async move {
                    client.store(block_id, frame).await
                })
                .await;
            match res {
                Ok(()) => {
                    inner.registry.note_block_stored(node_id, block_id);
                    added.push(node_id);
                }
                Err(e) => {
                    warn!(block_id = %block_id, node_id = %node_id, error = %e, "repair copy failed");
                }
            }
        }

        if added.is_empty() {
            return BlockRepair::Short;
        }
        let live = holders.len() + added.len();
        let mut dropped = dead;
        let kept = if live >= target {
            Vec::new()
        } else {
            dropped.split_off(added.len().min(dropped.len()))
        };
        let mut nodes = holders;
        nodes.extend(kept);
        self.commit_repair(block, nodes, added, dropped, target)
    }

    /// Record `nodes` plus the new copies in `added` as the block's replica
    /// set and queue deletes for the `dropped` holders.
    fn commit_repair(
        &self,
        block: &BlockRef,
        mut nodes: Vec<NodeId>,
        added: Vec<NodeId>,
        dropped: Vec<NodeId>,
        target: usize,
    ) -> BlockRepair {
        let inner = &self.inner;
        nodes.extend(added.iter().copied());
        let live = nodes
            .iter()
            .filter(|n| inner.registry.is_available(**n))
            .count();
        if !inner.namespace.update_block_nodes(block.block_id, nodes) {
            // File went away mid-repair; the new copies are garbage.
            debug!(block_id = %block.block_id, "block vanished during repair");
            inner.schedule_deletes(vec![(block.block_id, added)]);
            return BlockRepair::Healthy;
        }
        for node_id in &dropped {
            inner.enqueue_delete(PendingDelete {
                node_id: *node_id,
                block_id: block.block_id,
                attempts: 0,
            });
        }
        info!(block_id = %block.block_id, added = ?added, dropped = ?dropped, "block repaired");
        if live >= target {
            BlockRepair::Repaired
        } else {
            BlockRepair::Short
        }
    }

    /// Retry queued node-side deletes. Returns how many completed.
    pub async fn reconcile(&self) -> usize {
        let batch: Vec<PendingDelete> = self.inner.pending_deletes.lock().drain(..).collect();
        if batch.is_empty() {
            return 0;
        }
        let mut done = 0;
        for mut pending in batch {
            match self
                .inner
                .delete_replica(pending.node_id, pending.block_id)
                .await
            {
                Ok(()) => done += 1,
                Err(e) if pending.attempts + 1 >= MAX_RECONCILE_ATTEMPTS => {
                    error!(
                        block_id = %pending.block_id,
                        node_id = %pending.node_id,
                        error = %e,
                        "giving up on replica delete"
                    );
                }
                Err(e) => {
                    debug!(block_id = %pending.block_id, node_id = %pending.node_id, error = %e, "replica delete still failing");
                    pending.attempts += 1;
                    self.inner.enqueue_delete(pending);
                }
            }
        }
        info!(done, remaining = self.pending_deletes(), "reconcile pass");
        done
    }

    /// Ask every non-Dead node for its block report, then demote nodes with
    /// stale heartbeats. Returns the number of nodes that answered.
    pub async fn poll_heartbeats(&self) -> usize {
        let inner = &self.inner;
        let timeout = inner.config().rpc_timeout;
        let mut answered = 0;
        for node_id in inner.registry.node_ids() {
            if !inner.registry.is_available(node_id) {
                continue;
            }
            let res = inner
                .call_node(node_id, timeout, |client| async move {
                    client.heartbeat_report().await
                })
                .await;
            match res {
                Ok(blocks) => {
                    let count = blocks.len();
                    match inner.registry.heartbeat(node_id, blocks) {
                        Ok(_) => {
                            answered += 1;
                            debug!(node_id = %node_id, blocks = count, "heartbeat");
                        }
                        Err(e) => warn!(node_id = %node_id, error = %e, "heartbeat refused"),
                    }
                }
                Err(e) => debug!(node_id = %node_id, error = %e, "heartbeat failed"),
            }
        }
        for (node_id, state) in inner.registry.sweep() {
            warn!(node_id = %node_id, state = ?state, "node demoted by sweep");
        }
        answered
    }

    /// Run repair, reconcile and heartbeat polling on `runner` at the
    /// configured intervals.
    pub fn spawn_background(&self, runner: &mut BackgroundRunner) {
        let config = self.config();

        let this = self.clone();
        runner.spawn_periodic(config.repair_interval, move || {
            let this = this.clone();
            async move {
                this.repair().await;
            }
        });

        let this = self.clone();
        runner.spawn_periodic(config.reconcile_interval, move || {
            let this = this.clone();
            async move {
                this.reconcile().await;
            }
        });

        let this = self.clone();
        runner.spawn_periodic(config.heartbeat_interval, move || {
            let this = this.clone();
            async move {
                this.poll_heartbeats().await;
            }
        });
        info!(tasks = runner.len(), "background maintenance started");
    }

    /// Ids of blocks currently below their file's replica count.
    pub fn under_replicated_blocks(&self) -> Vec<BlockId> {
        self.inner
            .namespace
            .files()
            .iter()
            .flat_map(|f| {
                let target = f.policy.replication as usize;
                f.blocks
                    .iter()
                    .filter(move |b| b.nodes.len() < target)
                    .map(|b| b.block_id)
            })
            .collect()
    }
}

enum BlockRepair {
    Healthy,
    Repaired,
    Short,
}
