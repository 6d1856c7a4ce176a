//! Storage node table.
//!
//! State machine per node:
//!
//! ```text
//! Live --timeout / stale heartbeat--> Suspect --heartbeat--> Live
//! Live|Suspect --N timeouts / heartbeat lost / mark_dead--> Dead
//! Dead --reregister--> Live
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use bfs_types::status_code::ClusterCode;
use bfs_types::{make_error_msg, BlockId, NodeId, Result, Status, UtcTime};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ClusterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeState {
    Live,
    Suspect,
    Dead,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub address: String,
    /// Physical rack, when topology is known.
    pub rack: Option<String>,
    pub state: NodeState,
    pub last_heartbeat: UtcTime,
    pub consecutive_timeouts: u32,
    /// Blocks the node last reported, plus those stored through us since.
    pub blocks: HashSet<BlockId>,
}

impl NodeRecord {
    fn new(node_id: NodeId, address: String, rack: Option<String>) -> Self {
        Self {
            node_id,
            address,
            rack,
            state: NodeState::Live,
            last_heartbeat: UtcTime::now(),
            consecutive_timeouts: 0,
            blocks: HashSet::new(),
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_live(&self) -> bool {
        self.state == NodeState::Live
    }
}

#[derive(Debug)]
pub struct NodeRegistry {
    nodes: DashMap<NodeId, NodeRecord>,
    config: ClusterConfig,
}

impl NodeRegistry {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            nodes: DashMap::new(),
            config,
        }
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn not_found(node_id: NodeId) -> Status {
        Status::with_message(ClusterCode::NODE_NOT_FOUND, format!("node {}", node_id))
    }

    /// Add a node, or refresh the address and rack of a known one. A known
    /// node keeps its state; a Dead node must go through [`reregister`].
    ///
    /// [`reregister`]: Self::reregister
    pub fn register(&self, node_id: NodeId, address: impl Into<String>, rack: Option<String>) {
        let address = address.into();
        match self.nodes.entry(node_id) {
            Entry::Occupied(mut e) => {
                let rec = e.get_mut();
                rec.address = address;
                rec.rack = rack;
            }
            Entry::Vacant(e) => {
                info!(node_id = %node_id, address = %address, "node registered");
                e.insert(NodeRecord::new(node_id, address, rack));
            }
        }
    }

    /// The only way out of Dead.
    pub fn reregister(&self, node_id: NodeId) -> Result<()> {
        let mut rec = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Self::not_found(node_id))?;
        rec.state = NodeState::Live;
        rec.consecutive_timeouts = 0;
        rec.last_heartbeat = UtcTime::now();
        info!(node_id = %node_id, "node re-registered");
        Ok(())
    }

    /// Apply a heartbeat and its block report. Suspect nodes return to
    /// Live; Dead nodes are refused.
    pub fn heartbeat(&self, node_id: NodeId, reported: Vec<BlockId>) -> Result<NodeState> {
        let mut rec = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Self::not_found(node_id))?;
        if rec.state == NodeState::Dead {
            return make_error_msg(
                ClusterCode::NODE_DEAD,
                format!("node {} must re-register", node_id),
            );
        }
        if rec.state == NodeState::Suspect {
            info!(node_id = %node_id, "node back to live");
        }
        rec.state = NodeState::Live;
        rec.consecutive_timeouts = 0;
        rec.last_heartbeat = UtcTime::now();
        rec.blocks = reported.into_iter().collect();
        Ok(rec.state)
    }

    /// Count a call timeout. Returns the resulting state.
    pub fn record_timeout(&self, node_id: NodeId) -> Option<NodeState> {
        let mut rec = self.nodes.get_mut(&node_id)?;
        if rec.state == NodeState::Dead {
            return Some(NodeState::Dead);
        }
        rec.consecutive_timeouts += 1;
        let next = if rec.consecutive_timeouts >= self.config.dead_after_timeouts {
            NodeState::Dead
        } else {
            NodeState::Suspect
        };
        if next != rec.state {
            warn!(
                node_id = %node_id,
                timeouts = rec.consecutive_timeouts,
                state = ?next,
                "node state changed after timeout"
            );
        }
        rec.state = next;
        Some(next)
    }

    /// A call completed; the timeout streak is broken.
    pub fn record_success(&self, node_id: NodeId) {
        if let Some(mut rec) = self.nodes.get_mut(&node_id) {
            rec.consecutive_timeouts = 0;
        }
    }

    /// Administratively declare a node dead.
    pub fn mark_dead(&self, node_id: NodeId) -> Result<()> {
        let mut rec = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Self::not_found(node_id))?;
        rec.state = NodeState::Dead;
        warn!(node_id = %node_id, "node marked dead");
        Ok(())
    }

    /// Demote nodes whose heartbeat is stale. Returns the transitions made.
    pub fn sweep(&self) -> Vec<(NodeId, NodeState)> {
        let mut changed = Vec::new();
        for mut rec in self.nodes.iter_mut() {
            if rec.state == NodeState::Dead {
                continue;
            }
            let age = rec.last_heartbeat.elapsed();
            let next = if age > self.config.dead_after_missed_heartbeat {
                NodeState::Dead
            } else if age > self.config.heartbeat_timeout {
                NodeState::Suspect
            } else {
                rec.state
            };
            if next != rec.state {
                warn!(
                    node_id = %rec.node_id,
                    age_ms = age.as_millis() as u64,
                    state = ?next,
                    "heartbeat stale"
                );
                rec.state = next;
                changed.push((rec.node_id, next));
            }
        }
        changed
    }

    pub fn note_block_stored(&self, node_id: NodeId, block_id: BlockId) {
        if let Some(mut rec) = self.nodes.get_mut(&node_id) {
            rec.blocks.insert(block_id);
        }
    }

    pub fn note_block_removed(&self, node_id: NodeId, block_id: BlockId) {
        if let Some(mut rec) = self.nodes.get_mut(&node_id) {
            rec.blocks.remove(&block_id);
        }
    }

    pub fn get(&self, node_id: NodeId) -> Option<NodeRecord> {
        self.nodes.get(&node_id).map(|r| r.clone())
    }

    pub fn state(&self, node_id: NodeId) -> Option<NodeState> {
        self.nodes.get(&node_id).map(|r| r.state)
    }

    pub fn address(&self, node_id: NodeId) -> Option<String> {
        self.nodes.get(&node_id).map(|r| r.address.clone())
    }

    /// Known and not Dead.
    pub fn is_available(&self, node_id: NodeId) -> bool {
        matches!(
            self.state(node_id),
            Some(NodeState::Live) | Some(NodeState::Suspect)
        )
    }

    /// Snapshot of every record, ordered by node id.
    pub fn nodes(&self) -> Vec<NodeRecord> {
        let mut out: Vec<NodeRecord> = self.nodes.iter().map(|r| r.clone()).collect();
        out.sort_by_key(|r| r.node_id);
        out
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().into_iter().map(|r| r.node_id).collect()
    }

    pub fn live_nodes(&self) -> Vec<NodeRecord> {
        self.nodes().into_iter().filter(NodeRecord::is_live).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn backdate_heartbeat(&self, node_id: NodeId, by: std::time::Duration) {
        if let Some(mut rec) = self.nodes.get_mut(&node_id) {
            rec.last_heartbeat = rec.last_heartbeat.minus(by);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> NodeRegistry {
        let reg = NodeRegistry::new(ClusterConfig::default());
        reg.register(NodeId(1), "127.0.0.1:9001", None);
        reg.register(NodeId(2), "127.0.0.1:9002", Some("r1".into()));
        reg
    }

    #[test]
    fn test_register_and_lookup() {
        let reg = registry();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.state(NodeId(1)), Some(NodeState::Live));
        assert_eq!(reg.address(NodeId(2)).unwrap(), "127.0.0.1:9002");
        assert!(reg.get(NodeId(3)).is_none());

        reg.register(NodeId(2), "10.0.0.2:9002", None);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.address(NodeId(2)).unwrap(), "10.0.0.2:9002");
    }

    #[test]
    fn test_timeouts_suspect_then_dead() {
        let reg = registry();
        assert_eq!(reg.record_timeout(NodeId(1)), Some(NodeState::Suspect));
        assert!(reg.is_available(NodeId(1)));
        assert_eq!(reg.record_timeout(NodeId(1)), Some(NodeState::Suspect));
        assert_eq!(reg.record_timeout(NodeId(1)), Some(NodeState::Dead));
        assert!(!reg.is_available(NodeId(1)));
        assert_eq!(reg.record_timeout(NodeId(9)), None);
    }

    #[test]
    fn test_success_breaks_timeout_streak() {
        let reg = registry();
        reg.record_timeout(NodeId(1));
        reg.record_timeout(NodeId(1));
        reg.record_success(NodeId(1));
        assert_eq!(reg.record_timeout(NodeId(1)), Some(NodeState::Suspect));
    }

    #[test]
    fn test_heartbeat_revives_suspect_not_dead() {
        let reg = registry();
        reg.record_timeout(NodeId(1));
        assert_eq!(
            reg.heartbeat(NodeId(1), vec![BlockId(7)]).unwrap(),
            NodeState::Live
        );
        assert_eq!(reg.get(NodeId(1)).unwrap().block_count(), 1);

        reg.mark_dead(NodeId(2)).unwrap();
        let err = reg.heartbeat(NodeId(2), vec![]).unwrap_err();
        assert_eq!(err.code(), ClusterCode::NODE_DEAD);
        reg.register(NodeId(2), "127.0.0.1:9002", None);
        assert_eq!(reg.state(NodeId(2)), Some(NodeState::Dead));

        reg.reregister(NodeId(2)).unwrap();
        assert_eq!(reg.state(NodeId(2)), Some(NodeState::Live));
        assert_eq!(
            reg.heartbeat(NodeId(5), vec![]).unwrap_err().code(),
            ClusterCode::NODE_NOT_FOUND
        );
    }

    #[test]
    fn test_sweep_demotes_stale_nodes() {
        let reg = registry();
        reg.backdate_heartbeat(NodeId(1), Duration::from_secs(20));
        reg.backdate_heartbeat(NodeId(2), Duration::from_secs(120));
        let mut changed = reg.sweep();
        changed.sort_by_key(|(id, _)| *id);
        assert_eq!(
            changed,
            vec![(NodeId(1), NodeState::Suspect), (NodeId(2), NodeState::Dead)]
        );
        assert!(reg.sweep().is_empty());
        assert_eq!(reg.live_nodes().len(), 0);
    }

    #[test]
    fn test_block_accounting() {
        let reg = registry();
        reg.note_block_stored(NodeId(1), BlockId(1));
        reg.note_block_stored(NodeId(1), BlockId(2));
        reg.note_block_removed(NodeId(1), BlockId(1));
        assert_eq!(reg.get(NodeId(1)).unwrap().block_count(), 1);
        assert_eq!(reg.node_ids(), vec![NodeId(1), NodeId(2)]);
    }
}
