//! Per-path writer locks.
//!
//! Writers to the same path queue on one async mutex; writers to distinct
//! paths never contend. Idle entries are dropped as soon as the last holder
//! releases them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default, Clone)]
pub struct PathLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, path: &str) -> PathLockGuard {
        let mutex = self
            .locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        PathLockGuard {
            guard: Some(guard),
            locks: self.locks.clone(),
            path: path.to_string(),
        }
    }

    /// Number of paths with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct PathLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    path: String,
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.path, |_, m| Arc::strong_count(m) == 1);
    }
}
