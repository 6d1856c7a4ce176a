//! JSON snapshot of the namespace.
//!
//! The file holds a format version, the next block id and flat lists of
//! directory and file records. Loading rebuilds parent/child links from the
//! paths instead of trusting stored child sets.

use std::path::Path;

use bfs_types::status_code::{NamespaceCode, StatusCode};
use bfs_types::{make_error_msg, Result, Status};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::entry::{DirEntry, Entry, FileEntry};
use crate::path::PathResolver;
use crate::store::NamespaceStore;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    next_block_id: u64,
    dirs: Vec<DirEntry>,
    files: Vec<FileEntry>,
}

fn io_error(path: &Path, e: std::io::Error) -> Status {
    Status::with_message(StatusCode::IO_ERROR, format!("{}: {}", path.display(), e))
}

fn corrupt(msg: impl Into<String>) -> Status {
    Status::with_message(NamespaceCode::SNAPSHOT_CORRUPT, msg)
}

impl NamespaceStore {
    /// Write the namespace to `path`. The file is written to a sibling temp
    /// file and renamed into place.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = self.with_tree(|tree| {
            let mut dirs = Vec::new();
            let mut files = Vec::new();
            for entry in tree.entries.values() {
                match entry {
                    Entry::Dir(d) => dirs.push(d.clone()),
                    Entry::File(f) => files.push(f.clone()),
                }
            }
            Snapshot {
                version: SNAPSHOT_VERSION,
                next_block_id: self.peek_next_block_id(),
                dirs,
                files,
            }
        });

        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| Status::with_message(StatusCode::UNKNOWN, e.to_string()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| io_error(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| io_error(path, e))?;
        info!(
            path = %path.display(),
            dirs = snapshot.dirs.len(),
            files = snapshot.files.len(),
            "namespace snapshot saved"
        );
        Ok(())
    }

    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| io_error(path, e))?;
        let snapshot: Snapshot =
            serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return make_error_msg(
                NamespaceCode::SNAPSHOT_CORRUPT,
                format!("unsupported snapshot version {}", snapshot.version),
            );
        }

        let mut entries: Vec<Entry> = snapshot
            .dirs
            .into_iter()
            .map(Entry::Dir)
            .chain(snapshot.files.into_iter().map(Entry::File))
            .collect();
        for entry in &mut entries {
            let normalized = PathResolver::normalize(entry.path())
                .map_err(|e| corrupt(format!("bad path {:?}: {}", entry.path(), e)))?;
            match entry {
                Entry::Dir(d) => {
                    d.path = normalized;
                    d.children.clear();
                }
                Entry::File(f) => {
                    f.path = normalized;
                    let sum: u64 = f.blocks.iter().map(|b| b.length).sum();
                    if sum != f.length {
                        return Err(corrupt(format!(
                            "{}: block lengths sum to {} but file length is {}",
                            f.path, sum, f.length
                        )));
                    }
                }
            }
        }
        // Lexical order puts every parent before its children.
        entries.sort_by(|a, b| a.path().cmp(b.path()));

        let mut tree = Self::empty_tree();
        let mut max_block_id = 0u64;
        for entry in entries {
            if PathResolver::is_root(entry.path()) {
                if !entry.is_dir() {
                    return Err(corrupt("root is not a directory"));
                }
                continue;
            }
            if let Entry::File(f) = &entry {
                max_block_id = f
                    .blocks
                    .iter()
                    .map(|b| b.block_id.0)
                    .fold(max_block_id, u64::max);
            }
            let p = entry.path().to_string();
            tree.insert(entry)
                .map_err(|e| corrupt(format!("cannot place {}: {}", p, e)))?;
        }

        let next_block_id = snapshot.next_block_id.max(max_block_id + 1);
        let store = Self::from_tree(tree, next_block_id);
        info!(path = %path.display(), entries = store.len(), "namespace snapshot loaded");
        Ok(store)
    }
}
