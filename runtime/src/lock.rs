//! In-process keyed lock.

use eventide_core::{BoxFuture, Lock, LockGuard, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A [`Lock`] backed by one async mutex per key.
///
/// Waiters on the same key are served in FIFO order (tokio's mutex is fair).
/// Keys are never evicted; the map grows with the number of distinct keys,
/// which for views is one per projection.
#[derive(Clone, Default)]
pub struct InMemoryLock {
    keys: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl InMemoryLock {
    /// Create a lock with no keys held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(keys.entry(key.to_string()).or_default())
    }

    /// Whether `key` is currently held.
    #[must_use]
    pub fn is_locked(&self, key: &str) -> bool {
        self.mutex_for(key).try_lock().is_err()
    }
}

impl Lock for InMemoryLock {
    fn acquire<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<LockGuard>> {
        Box::pin(async move {
            let guard = self.mutex_for(key).lock_owned().await;
            tracing::trace!(key, "Lock acquired");
            Ok(LockGuard::new(key, guard))
        })
    }
}

impl std::fmt::Debug for InMemoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLock").finish_non_exhaustive()
    }
}
