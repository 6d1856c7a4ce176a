//! In-memory block replica store.
//!
//! Holds block frames exactly as received so the checksum embedded in each
//! frame can be re-verified when the block is served.

use std::sync::atomic::{AtomicU64, Ordering};

use bfs_types::status_code::StorageCode;
use bfs_types::{make_error_msg, BlockId, Result, Status};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug)]
pub struct BlockStore {
    blocks: DashMap<BlockId, Bytes>,
    capacity: u64,
    used: AtomicU64,
}

impl BlockStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            blocks: DashMap::new(),
            capacity,
            used: AtomicU64::new(0),
        }
    }

    /// Store (or replace) a block frame. Fails with NODE_FULL when the
    /// frame does not fit in the remaining capacity.
    pub fn put(&self, block_id: BlockId, frame: Bytes) -> Result<()> {
        let new_len = frame.len() as u64;
        match self.blocks.entry(block_id) {
            Entry::Occupied(mut e) => {
                let old_len = e.get().len() as u64;
                if new_len > old_len {
                    self.reserve(new_len - old_len, block_id)?;
                } else {
                    self.release(old_len - new_len);
                }
                e.insert(frame);
            }
            Entry::Vacant(e) => {
                self.reserve(new_len, block_id)?;
                e.insert(frame);
            }
        }
        Ok(())
    }

    fn reserve(&self, bytes: u64, block_id: BlockId) -> Result<()> {
        let capacity = self.capacity;
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(bytes).filter(|total| *total <= capacity)
            })
            .map(|_| ())
            .map_err(|used| {
                Status::with_message(
                    StorageCode::NODE_FULL,
                    format!(
                        "block {} needs {} bytes, {} of {} in use",
                        block_id, bytes, used, capacity
                    ),
                )
            })
    }

    fn release(&self, bytes: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    pub fn get(&self, block_id: BlockId) -> Result<Bytes> {
        self.blocks
            .get(&block_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| {
                Status::with_message(StorageCode::BLOCK_NOT_FOUND, format!("block {}", block_id))
            })
    }

    pub fn remove(&self, block_id: BlockId) -> Result<()> {
        match self.blocks.remove(&block_id) {
            Some((_, frame)) => {
                self.release(frame.len() as u64);
                Ok(())
            }
            None => make_error_msg(StorageCode::BLOCK_NOT_FOUND, format!("block {}", block_id)),
        }
    }

    pub fn contains(&self, block_id: BlockId) -> bool {
        self.blocks.contains_key(&block_id)
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        let mut ids: Vec<BlockId> = self.blocks.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[cfg(test)]
    pub(crate) fn overwrite_raw(&self, block_id: BlockId, frame: Bytes) {
        self.blocks.insert(block_id, frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let store = BlockStore::new(1024);
        store.put(BlockId(1), Bytes::from_static(b"abcd")).unwrap();
        assert_eq!(store.get(BlockId(1)).unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(store.used_bytes(), 4);

        store.remove(BlockId(1)).unwrap();
        assert!(!store.contains(BlockId(1)));
        assert_eq!(store.used_bytes(), 0);
        assert_eq!(
            store.remove(BlockId(1)).unwrap_err().code(),
            StorageCode::BLOCK_NOT_FOUND
        );
        assert_eq!(
            store.get(BlockId(1)).unwrap_err().code(),
            StorageCode::BLOCK_NOT_FOUND
        );
    }

    #[test]
    fn test_capacity_enforced() {
        let store = BlockStore::new(10);
        store.put(BlockId(1), Bytes::from(vec![0u8; 8])).unwrap();
        let err = store.put(BlockId(2), Bytes::from(vec![0u8; 3])).unwrap_err();
        assert_eq!(err.code(), StorageCode::NODE_FULL);
        assert!(!store.contains(BlockId(2)));
        assert_eq!(store.used_bytes(), 8);
    }

    #[test]
    fn test_replace_adjusts_usage() {
        let store = BlockStore::new(10);
        store.put(BlockId(1), Bytes::from(vec![0u8; 8])).unwrap();
        store.put(BlockId(1), Bytes::from(vec![0u8; 2])).unwrap();
        assert_eq!(store.used_bytes(), 2);
        store.put(BlockId(1), Bytes::from(vec![0u8; 10])).unwrap();
        assert_eq!(store.used_bytes(), 10);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_block_ids_sorted() {
        let store = BlockStore::new(100);
        for id in [5u64, 1, 3] {
            store.put(BlockId(id), Bytes::from_static(b"x")).unwrap();
        }
        assert_eq!(store.block_ids(), vec![BlockId(1), BlockId(3), BlockId(5)]);
    }
}
