//! Replica target selection.

use std::collections::HashSet;
use std::sync::Arc;

use bfs_namespace::ReplicationPolicy;
use bfs_types::status_code::ClusterCode;
use bfs_types::{make_error_msg, NodeId, Result};
use tracing::debug;

use crate::registry::{NodeRecord, NodeRegistry, NodeState};

/// Picks nodes for new replicas: Live nodes only, least loaded first, at
/// most one replica per known rack.
#[derive(Debug, Clone)]
pub struct ReplicaPlacer {
    registry: Arc<NodeRegistry>,
}

impl ReplicaPlacer {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Exactly `policy.replication` targets for a new block.
    pub fn place_block(&self, policy: &ReplicationPolicy, exclude: &[NodeId]) -> Result<Vec<NodeId>> {
        self.place_additional(policy.replication as usize, &[], exclude)
    }

    /// Exactly `count` targets to sit alongside the replicas in `existing`.
    pub fn place_additional(
        &self,
        count: usize,
        existing: &[NodeId],
        exclude: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        let chosen = self.choose(count, existing, exclude);
        if chosen.len() < count {
            return make_error_msg(
                ClusterCode::INSUFFICIENT_NODES,
                format!("need {} nodes, only {} eligible", count, chosen.len()),
            );
        }
        Ok(chosen)
    }

    /// Up to `count` targets; fewer if the cluster cannot supply them.
    pub fn choose(&self, count: usize, existing: &[NodeId], exclude: &[NodeId]) -> Vec<NodeId> {
        let skip: HashSet<NodeId> = existing.iter().chain(exclude).copied().collect();
        let mut used_racks: HashSet<String> = existing
            .iter()
            .filter_map(|id| self.registry.get(*id))
            .filter_map(|rec| rec.rack)
            .collect();

        let mut candidates: Vec<NodeRecord> = self
            .registry
            .live_nodes()
            .into_iter()
            .filter(|rec| !skip.contains(&rec.node_id))
            .collect();
        candidates.sort_by_key(|rec| (rec.block_count(), rec.node_id));

        let mut chosen = Vec::with_capacity(count);
        for rec in candidates {
            if chosen.len() == count {
                break;
            }
            if let Some(rack) = &rec.rack {
                if !used_racks.insert(rack.clone()) {
                    continue;
                }
            }
            chosen.push(rec.node_id);
        }
        debug!(count, chosen = ?chosen, "placement");
        chosen
    }

    /// Order replica holders for reading: Live before Suspect, then least
    /// loaded. Dead and unknown nodes are dropped.
    pub fn read_order(&self, nodes: &[NodeId]) -> Vec<NodeId> {
        let mut ranked: Vec<(u8, usize, usize, NodeId)> = nodes
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| {
                let rec = self.registry.get(*id)?;
                let tier = match rec.state {
                    NodeState::Live => 0,
                    NodeState::Suspect => 1,
                    NodeState::Dead => return None,
                };
                Some((tier, rec.block_count(), pos, *id))
            })
            .collect();
        ranked.sort();
        ranked.into_iter().map(|(_, _, _, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use bfs_types::BlockId;

    fn setup(nodes: &[(u32, Option<&str>, usize)]) -> ReplicaPlacer {
        let reg = NodeRegistry::new(ClusterConfig::default()).into_arc();
        let mut next_block = 0;
        for (id, rack, load) in nodes {
            reg.register(NodeId(*id), format!("127.0.0.1:{}", 9000 + id), rack.map(String::from));
            for _ in 0..*load {
                next_block += 1;
                reg.note_block_stored(NodeId(*id), BlockId(next_block));
            }
        }
        ReplicaPlacer::new(reg)
    }

    #[test]
    fn test_least_loaded_first() {
        let placer = setup(&[(1, None, 5), (2, None, 0), (3, None, 2), (4, None, 1)]);
        let chosen = placer.place_block(&ReplicationPolicy::new(3, 4), &[]).unwrap();
        assert_eq!(chosen, vec![NodeId(2), NodeId(4), NodeId(3)]);
    }

    #[test]
    fn test_excludes_and_dead_nodes() {
        let placer = setup(&[(1, None, 0), (2, None, 0), (3, None, 0)]);
        placer.registry().mark_dead(NodeId(1)).unwrap();
        let chosen = placer
            .place_block(&ReplicationPolicy::new(1, 4), &[NodeId(2)])
            .unwrap();
        assert_eq!(chosen, vec![NodeId(3)]);
    }

    #[test]
    fn test_insufficient_nodes() {
        let placer = setup(&[(1, None, 0), (2, None, 0)]);
        let err = placer
            .place_block(&ReplicationPolicy::new(3, 4), &[])
            .unwrap_err();
        assert_eq!(err.code(), ClusterCode::INSUFFICIENT_NODES);
        assert_eq!(placer.choose(3, &[], &[]).len(), 2);
    }

    #[test]
    fn test_rack_diversity() {
        let placer = setup(&[
            (1, Some("a"), 0),
            (2, Some("a"), 0),
            (3, Some("b"), 1),
            (4, Some("c"), 2),
        ]);
        let chosen = placer.place_block(&ReplicationPolicy::new(3, 4), &[]).unwrap();
        assert_eq!(chosen, vec![NodeId(1), NodeId(3), NodeId(4)]);

        // only racks a and b available besides existing replica on a
        let err = placer
            .place_additional(2, &[NodeId(1)], &[NodeId(4)])
            .unwrap_err();
        assert_eq!(err.code(), ClusterCode::INSUFFICIENT_NODES);
    }

    #[test]
    fn test_read_order() {
        let placer = setup(&[(1, None, 3), (2, None, 0), (3, None, 1), (4, None, 0)]);
        placer.registry().record_timeout(NodeId(2));
        placer.registry().mark_dead(NodeId(4)).unwrap();
        let order = placer.read_order(&[NodeId(4), NodeId(2), NodeId(1), NodeId(3), NodeId(9)]);
        assert_eq!(order, vec![NodeId(3), NodeId(1), NodeId(2)]);
    }
}
