//! The path-to-metadata namespace.
//!
//! [`NamespaceStore`] owns every [`FileEntry`] and [`DirEntry`]; callers only
//! ever receive clones. Paths are validated and normalized by
//! [`PathResolver`] before they reach the tree.

pub mod entry;
pub mod lock;
pub mod path;
pub mod snapshot;
pub mod store;

pub use entry::{
    BlockRef, DirEntry, Entry, FileEntry, ListEntry, ReplicationPolicy, MAX_BLOCK_SIZE,
};
pub use lock::{PathLockGuard, PathLocks};
pub use path::{PathResolver, ROOT};
pub use store::NamespaceStore;
