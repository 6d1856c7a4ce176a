//! Namespace records.

use std::collections::BTreeSet;

use bfs_types::status_code::StatusCode;
use bfs_types::{make_error_msg, BlockId, NodeId, Result, UtcTime};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REPLICATION: u32 = 3;
pub const DEFAULT_BLOCK_SIZE: u64 = 4 << 20;
/// Blocks travel in a single node message, so they stay well below the
/// message size cap.
pub const MAX_BLOCK_SIZE: u64 = 128 << 20;

/// Replica count and block size, fixed per file at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    pub replication: u32,
    pub block_size: u64,
}

impl ReplicationPolicy {
    pub fn new(replication: u32, block_size: u64) -> Self {
        Self {
            replication,
            block_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.replication == 0 {
            return make_error_msg(StatusCode::INVALID_ARG, "replication must be at least 1");
        }
        if self.block_size == 0 {
            return make_error_msg(StatusCode::INVALID_ARG, "block size must be non-zero");
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return make_error_msg(
                StatusCode::INVALID_ARG,
                format!(
                    "block size {} exceeds limit {}",
                    self.block_size, MAX_BLOCK_SIZE
                ),
            );
        }
        Ok(())
    }
}

impl Default for ReplicationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICATION, DEFAULT_BLOCK_SIZE)
    }
}

/// A finalized block and the nodes holding its replicas, in read
/// preference order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub block_id: BlockId,
    pub length: u64,
    pub checksum: u32,
    pub nodes: Vec<NodeId>,
}

impl BlockRef {
    /// Copy of this block with a different replica set. Id, length and
    /// checksum never change after finalize.
    pub fn with_nodes(&self, nodes: Vec<NodeId>) -> Self {
        Self {
            nodes,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub length: u64,
    pub policy: ReplicationPolicy,
    pub blocks: Vec<BlockRef>,
    pub created: UtcTime,
}

impl FileEntry {
    pub fn new(path: String, policy: ReplicationPolicy) -> Self {
        Self {
            path,
            length: 0,
            policy,
            blocks: Vec::new(),
            created: UtcTime::now(),
        }
    }

    /// Byte offset of each block within the file.
    pub fn block_offsets(&self) -> impl Iterator<Item = (u64, &BlockRef)> {
        self.blocks.iter().scan(0u64, |offset, block| {
            let start = *offset;
            *offset += block.length;
            Some((start, block))
        })
    }

    pub fn is_under_replicated(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| (b.nodes.len() as u32) < self.policy.replication)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub path: String,
    pub children: BTreeSet<String>,
    pub created: UtcTime,
}

impl DirEntry {
    pub fn new(path: String) -> Self {
        Self {
            path,
            children: BTreeSet::new(),
            created: UtcTime::now(),
        }
    }
}

/// A node in the namespace tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File(FileEntry),
    Dir(DirEntry),
}

impl Entry {
    pub fn path(&self) -> &str {
        match self {
            Entry::File(f) => &f.path,
            Entry::Dir(d) => &d.path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Dir(_))
    }

    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Entry::File(f) => Some(f),
            Entry::Dir(_) => None,
        }
    }

    pub fn as_dir(&self) -> Option<&DirEntry> {
        match self {
            Entry::Dir(d) => Some(d),
            Entry::File(_) => None,
        }
    }

    pub fn length(&self) -> u64 {
        self.as_file().map_or(0, |f| f.length)
    }
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub length: u64,
    /// Replica nodes of each block, in block order. Empty for directories.
    pub replica_locations: Vec<Vec<NodeId>>,
}

impl From<&Entry> for ListEntry {
    fn from(entry: &Entry) -> Self {
        let path = entry.path().to_string();
        let name = crate::path::PathResolver::file_name(&path).to_string();
        match entry {
            Entry::File(f) => ListEntry {
                name,
                path,
                is_dir: false,
                length: f.length,
                replica_locations: f.blocks.iter().map(|b| b.nodes.clone()).collect(),
            },
            Entry::Dir(_) => ListEntry {
                name,
                path,
                is_dir: true,
                length: 0,
                replica_locations: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: u64, len: u64, nodes: &[u32]) -> BlockRef {
        BlockRef {
            block_id: BlockId(id),
            length: len,
            checksum: 0,
            nodes: nodes.iter().copied().map(NodeId).collect(),
        }
    }

    #[test]
    fn test_policy_block_size_bounds() {
        assert!(ReplicationPolicy::new(3, MAX_BLOCK_SIZE).validate().is_ok());
        let err = ReplicationPolicy::new(3, MAX_BLOCK_SIZE + 1)
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), StatusCode::INVALID_ARG);
        assert!(ReplicationPolicy::new(3, 0).validate().is_err());
        assert!(ReplicationPolicy::new(0, 1024).validate().is_err());
    }

    #[test]
    fn test_policy_validate() {
        assert!(ReplicationPolicy::default().validate().is_ok());
        assert_eq!(
            ReplicationPolicy::new(0, 1).validate().unwrap_err().code(),
            StatusCode::INVALID_ARG
        );
        assert!(ReplicationPolicy::new(1, 0).validate().is_err());
    }

    #[test]
    fn test_block_offsets() {
        let mut f = FileEntry::new("/f".into(), ReplicationPolicy::new(2, 4));
        f.blocks = vec![block(1, 4, &[1, 2]), block(2, 4, &[1, 2]), block(3, 1, &[2])];
        let offsets: Vec<u64> = f.block_offsets().map(|(o, _)| o).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        assert!(f.is_under_replicated());
    }

    #[test]
    fn test_with_nodes_keeps_identity() {
        let b = block(7, 10, &[1]);
        let repaired = b.with_nodes(vec![NodeId(1), NodeId(4)]);
        assert_eq!(repaired.block_id, b.block_id);
        assert_eq!(repaired.checksum, b.checksum);
        assert_eq!(repaired.nodes.len(), 2);
    }

    #[test]
    fn test_list_entry_from_file() {
        let mut f = FileEntry::new("/d/f".into(), ReplicationPolicy::default());
        f.length = 3;
        f.blocks = vec![block(1, 3, &[5, 6])];
        let row = ListEntry::from(&Entry::File(f));
        assert_eq!(row.name, "f");
        assert!(!row.is_dir);
        assert_eq!(row.replica_locations, vec![vec![NodeId(5), NodeId(6)]]);
    }
}
