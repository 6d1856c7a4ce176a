//! In-memory namespace tree.
//!
//! Every mutation runs under one write lock, so readers observe either the
//! state before or after an operation and never a partial one. Per-path
//! writer locks ([`PathLocks`]) sit above this and only serialize long
//! running puts to the same path.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use bfs_types::status_code::NamespaceCode;
use bfs_types::{make_error, make_error_msg, BlockId, NodeId, Result, Status};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::entry::{BlockRef, DirEntry, Entry, FileEntry, ListEntry, ReplicationPolicy};
use crate::lock::{PathLockGuard, PathLocks};
use crate::path::{PathResolver, ROOT};

#[derive(Debug)]
pub(crate) struct Tree {
    pub(crate) entries: BTreeMap<String, Entry>,
    block_index: HashMap<BlockId, String>,
}

impl Tree {
    fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(ROOT.to_string(), Entry::Dir(DirEntry::new(ROOT.to_string())));
        Self {
            entries,
            block_index: HashMap::new(),
        }
    }

    fn not_found(path: &str) -> Status {
        Status::with_message(NamespaceCode::NOT_FOUND, path.to_string())
    }

    fn get(&self, path: &str) -> Result<&Entry> {
        self.entries.get(path).ok_or_else(|| Self::not_found(path))
    }

    /// Parent directory of `path`, which must exist and be a directory.
    fn parent_dir_mut(&mut self, path: &str) -> Result<&mut DirEntry> {
        let parent = PathResolver::parent(path).ok_or_else(|| {
            Status::with_message(NamespaceCode::INVALID_PATH, "root has no parent")
        })?;
        match self.entries.get_mut(parent) {
            Some(Entry::Dir(dir)) => Ok(dir),
            Some(Entry::File(_)) => make_error_msg(
                NamespaceCode::NOT_DIRECTORY,
                format!("parent {} is a file", parent),
            ),
            None => make_error_msg(
                NamespaceCode::NOT_FOUND,
                format!("parent directory {} does not exist", parent),
            ),
        }
    }

    /// Insert a new entry under an existing parent directory.
    pub(crate) fn insert(&mut self, entry: Entry) -> Result<()> {
        let path = entry.path().to_string();
        if self.entries.contains_key(&path) {
            return make_error_msg(NamespaceCode::ALREADY_EXISTS, path);
        }
        let name = PathResolver::file_name(&path).to_string();
        self.parent_dir_mut(&path)?.children.insert(name);
        if let Entry::File(file) = &entry {
            for block in &file.blocks {
                self.block_index.insert(block.block_id, path.clone());
            }
        }
        self.entries.insert(path, entry);
        Ok(())
    }

    /// Detach `path` and everything below it. Walks the children with an
    /// explicit stack so deep trees cannot exhaust the call stack.
    fn remove_subtree(&mut self, path: &str) -> Vec<Entry> {
        if let Ok(parent) = self.parent_dir_mut(path) {
            parent.children.remove(PathResolver::file_name(path));
        }
        let mut removed = Vec::new();
        let mut stack = vec![path.to_string()];
        while let Some(current) = stack.pop() {
            let Some(entry) = self.entries.remove(&current) else {
                continue;
            };
            match &entry {
                Entry::Dir(dir) => {
                    stack.extend(
                        dir.children
                            .iter()
                            .map(|name| PathResolver::join(&current, name)),
                    );
                }
                Entry::File(file) => {
                    for block in &file.blocks {
                        self.block_index.remove(&block.block_id);
                    }
                }
            }
            removed.push(entry);
        }
        removed
    }

    fn file_mut(&mut self, path: &str) -> Result<&mut FileEntry> {
        match self.entries.get_mut(path) {
            Some(Entry::File(file)) => Ok(file),
            Some(Entry::Dir(_)) => make_error_msg(NamespaceCode::IS_DIRECTORY, path.to_string()),
            None => Err(Self::not_found(path)),
        }
    }

    fn append_block(&mut self, path: &str, block: BlockRef) -> Result<()> {
        let file = self.file_mut(path)?;
        file.length += block.length;
        let block_id = block.block_id;
        file.blocks.push(block);
        self.block_index.insert(block_id, path.to_string());
        Ok(())
    }

    /// Check that a file may be written at `path`.
    fn check_writable(&self, path: &str, overwrite: bool) -> Result<()> {
        match self.entries.get(path) {
            Some(Entry::Dir(_)) => {
                return make_error_msg(NamespaceCode::IS_DIRECTORY, path.to_string())
            }
            Some(Entry::File(_)) if !overwrite => {
                return make_error_msg(NamespaceCode::ALREADY_EXISTS, path.to_string())
            }
            _ => {}
        }
        let parent = PathResolver::parent(path).ok_or_else(|| {
            Status::with_message(NamespaceCode::IS_DIRECTORY, path.to_string())
        })?;
        match self.entries.get(parent) {
            Some(Entry::Dir(_)) => Ok(()),
            Some(Entry::File(_)) => make_error_msg(NamespaceCode::NOT_DIRECTORY, parent.to_string()),
            None => make_error_msg(
                NamespaceCode::NOT_FOUND,
                format!("parent directory {} does not exist", parent),
            ),
        }
    }
}

/// Owner of the namespace tree.
#[derive(Debug)]
pub struct NamespaceStore {
    tree: RwLock<Tree>,
    next_block_id: AtomicU64,
    path_locks: PathLocks,
}

impl Default for NamespaceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceStore {
    /// Create a namespace containing only the root directory.
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Tree::new()),
            next_block_id: AtomicU64::new(1),
            path_locks: PathLocks::new(),
        }
    }

    pub(crate) fn from_tree(tree: Tree, next_block_id: u64) -> Self {
        Self {
            tree: RwLock::new(tree),
            next_block_id: AtomicU64::new(next_block_id),
            path_locks: PathLocks::new(),
        }
    }

    pub(crate) fn empty_tree() -> Tree {
        Tree::new()
    }

    pub(crate) fn with_tree<R>(&self, f: impl FnOnce(&Tree) -> R) -> R {
        f(&self.tree.read())
    }

    pub(crate) fn peek_next_block_id(&self) -> u64 {
        self.next_block_id.load(Ordering::SeqCst)
    }

    /// Allocate a fresh, never reused block id.
    pub fn alloc_block_id(&self) -> BlockId {
        BlockId(self.next_block_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Take the writer lock for `path`; held for the whole of a put.
    pub async fn lock_path(&self, path: &str) -> Result<PathLockGuard> {
        let path = PathResolver::normalize(path)?;
        Ok(self.path_locks.lock(&path).await)
    }

    pub fn create_file(&self, path: &str, policy: ReplicationPolicy) -> Result<FileEntry> {
        policy.validate()?;
        let path = PathResolver::normalize(path)?;
        let file = FileEntry::new(path.clone(), policy);
        self.tree.write().insert(Entry::File(file.clone()))?;
        debug!(path = %path, replication = policy.replication, "create_file");
        Ok(file)
    }

    pub fn create_dir(&self, path: &str) -> Result<()> {
        let path = PathResolver::normalize(path)?;
        self.tree.write().insert(Entry::Dir(DirEntry::new(path.clone())))?;
        debug!(path = %path, "create_dir");
        Ok(())
    }

    /// Create `path` and any missing ancestors. Existing directories along
    /// the way are fine; a file anywhere on the path is not.
    pub fn mkdirs(&self, path: &str) -> Result<()> {
        let path = PathResolver::normalize(path)?;
        let mut tree = self.tree.write();
        let mut current = ROOT.to_string();
        let mut created = 0usize;
        for seg in PathResolver::segments(&path) {
            current = PathResolver::join(&current, seg);
            match tree.entries.get(&current) {
                Some(Entry::Dir(_)) => {}
                Some(Entry::File(_)) => {
                    return make_error_msg(
                        NamespaceCode::NOT_DIRECTORY,
                        format!("{} is a file", current),
                    )
                }
                None => {
                    tree.insert(Entry::Dir(DirEntry::new(current.clone())))?;
                    created += 1;
                }
            }
        }
        debug!(path = %path, created, "mkdirs");
        Ok(())
    }

    /// Remove `path`. Returns every block that belonged to removed files so
    /// the caller can reclaim replicas.
    pub fn delete(&self, path: &str, recursive: bool) -> Result<Vec<BlockRef>> {
        let path = PathResolver::normalize(path)?;
        if PathResolver::is_root(&path) {
            return make_error_msg(NamespaceCode::INVALID_PATH, "cannot delete the root");
        }
        let mut tree = self.tree.write();
        if let Entry::Dir(dir) = tree.get(&path)? {
            if !recursive && !dir.children.is_empty() {
                return make_error_msg(NamespaceCode::NOT_EMPTY, path);
            }
        }
        let removed = tree.remove_subtree(&path);
        drop(tree);

        let blocks: Vec<BlockRef> = removed
            .into_iter()
            .filter_map(|e| match e {
                Entry::File(f) => Some(f.blocks),
                Entry::Dir(_) => None,
            })
            .flatten()
            .collect();
        info!(path = %path, recursive, blocks = blocks.len(), "deleted");
        Ok(blocks)
    }

    /// Move `src` (and its subtree) to `dst` in one step.
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let src = PathResolver::normalize(src)?;
        let dst = PathResolver::normalize(dst)?;
        if PathResolver::is_root(&src) {
            return make_error_msg(NamespaceCode::INVALID_PATH, "cannot rename the root");
        }

        let mut tree = self.tree.write();
        tree.get(&src)?;
        if tree.entries.contains_key(&dst) {
            return make_error_msg(NamespaceCode::ALREADY_EXISTS, dst);
        }
        if PathResolver::is_ancestor(&src, &dst) {
            return make_error_msg(
                NamespaceCode::INVALID_PATH,
                format!("cannot move {} into its own subtree {}", src, dst),
            );
        }
        // Validate the destination parent before touching anything.
        tree.parent_dir_mut(&dst)?;

        let moved = tree.remove_subtree(&src);
        for mut entry in moved {
            match &mut entry {
                Entry::File(f) => f.path = PathResolver::rebase(&f.path, &src, &dst),
                Entry::Dir(d) => d.path = PathResolver::rebase(&d.path, &src, &dst),
            }
            let new_path = entry.path().to_string();
            if let Entry::File(f) = &entry {
                for block in &f.blocks {
                    tree.block_index.insert(block.block_id, new_path.clone());
                }
            }
            if new_path == dst {
                let name = PathResolver::file_name(&dst).to_string();
                tree.parent_dir_mut(&dst)?.children.insert(name);
            }
            tree.entries.insert(new_path, entry);
        }
        info!(src = %src, dst = %dst, "renamed");
        Ok(())
    }

    /// Immediate children of a directory, or the file itself.
    pub fn list(&self, path: &str) -> Result<Vec<ListEntry>> {
        let path = PathResolver::normalize(path)?;
        let tree = self.tree.read();
        match tree.get(&path)? {
            Entry::Dir(dir) => Ok(dir
                .children
                .iter()
                .filter_map(|name| tree.entries.get(&PathResolver::join(&path, name)))
                .map(ListEntry::from)
                .collect()),
            file @ Entry::File(_) => Ok(vec![ListEntry::from(file)]),
        }
    }

    pub fn stat(&self, path: &str) -> Result<Entry> {
        let path = PathResolver::normalize(path)?;
        self.tree.read().get(&path).cloned()
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        let path = PathResolver::normalize(path)?;
        Ok(self.tree.read().entries.contains_key(&path))
    }

    pub fn append_block(&self, path: &str, block: BlockRef) -> Result<()> {
        let path = PathResolver::normalize(path)?;
        let block_id = block.block_id;
        self.tree.write().append_block(&path, block)?;
        debug!(path = %path, block_id = %block_id, "append_block");
        Ok(())
    }

    /// Fail fast if a put to `path` cannot succeed. Returns the normalized
    /// path.
    pub fn check_writable(&self, path: &str, overwrite: bool) -> Result<String> {
        let path = PathResolver::normalize(path)?;
        self.tree.read().check_writable(&path, overwrite)?;
        Ok(path)
    }

    /// Publish a fully written file in one step: create it (replacing an
    /// existing file when `overwrite` is set) and append all its blocks.
    /// Returns the replaced entry, if any.
    pub fn commit_file(
        &self,
        path: &str,
        policy: ReplicationPolicy,
        blocks: Vec<BlockRef>,
        overwrite: bool,
    ) -> Result<Option<FileEntry>> {
        policy.validate()?;
        let path = PathResolver::normalize(path)?;
        let mut tree = self.tree.write();
        tree.check_writable(&path, overwrite)?;

        let replaced = if tree.entries.contains_key(&path) {
            tree.remove_subtree(&path).into_iter().find_map(|e| match e {
                Entry::File(f) => Some(f),
                Entry::Dir(_) => None,
            })
        } else {
            None
        };
        tree.insert(Entry::File(FileEntry::new(path.clone(), policy)))?;
        let count = blocks.len();
        for block in blocks {
            tree.append_block(&path, block)?;
        }
        drop(tree);

        info!(
            path = %path,
            blocks = count,
            replaced = replaced.is_some(),
            "commit_file"
        );
        Ok(replaced)
    }

    /// Files at or below `path`. With `recursive` unset only the direct
    /// children of a directory are returned.
    pub fn walk_files(&self, path: &str, recursive: bool) -> Result<Vec<FileEntry>> {
        let path = PathResolver::normalize(path)?;
        let tree = self.tree.read();
        let mut files = Vec::new();
        let mut stack = vec![(path, 0usize)];
        while let Some((current, depth)) = stack.pop() {
            match tree.get(&current)? {
                Entry::File(f) => files.push(f.clone()),
                Entry::Dir(dir) => {
                    if depth > 0 && !recursive {
                        continue;
                    }
                    // Reverse so the stack yields children in name order.
                    for name in dir.children.iter().rev() {
                        stack.push((PathResolver::join(&current, name), depth + 1));
                    }
                }
            }
        }
        Ok(files)
    }

    /// Point-in-time copy of every file, for repair scans.
    pub fn files(&self) -> Vec<FileEntry> {
        self.tree
            .read()
            .entries
            .values()
            .filter_map(|e| e.as_file().cloned())
            .collect()
    }

    pub fn locate_block(&self, block_id: BlockId) -> Option<(String, BlockRef)> {
        let tree = self.tree.read();
        let path = tree.block_index.get(&block_id)?;
        let file = tree.entries.get(path)?.as_file()?;
        let block = file.blocks.iter().find(|b| b.block_id == block_id)?;
        Some((path.clone(), block.clone()))
    }

    /// Replace the replica set of a finalized block wherever its file now
    /// lives. Returns `false` if the block is gone.
    pub fn update_block_nodes(&self, block_id: BlockId, nodes: Vec<NodeId>) -> bool {
        let mut tree = self.tree.write();
        let Some(path) = tree.block_index.get(&block_id).cloned() else {
            return false;
        };
        let Ok(file) = tree.file_mut(&path) else {
            return false;
        };
        match file.blocks.iter_mut().find(|b| b.block_id == block_id) {
            Some(block) => {
                *block = block.with_nodes(nodes);
                true
            }
            None => false,
        }
    }

    /// Number of entries, including the root.
    pub fn len(&self) -> usize {
        self.tree.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}
