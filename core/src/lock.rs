//! Mutual exclusion by key.
//!
//! A [`Lock`] hands out a [`LockGuard`] per key; the key is released when the
//! guard is dropped. Acquisition and release therefore cannot get out of
//! balance, whatever path the critical section exits through.

use crate::error::Result;
use crate::storage::BoxFuture;
use std::fmt;

/// Keyed locking primitive.
///
/// Implementations range from an in-process mutex map (`InMemoryLock` in
/// `eventide-runtime`) to a distributed lock. Locking is advisory.
pub trait Lock: Send + Sync {
    /// Wait until `key` is free and take it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::Error::Storage) or
    /// [`Error::Transport`](crate::Error::Transport) when a remote lock
    /// backend fails.
    fn acquire<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<LockGuard>>;
}

/// Holds a key until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    key: String,
    _release: Box<dyn Send + Sync>,
}

impl LockGuard {
    /// Wrap whatever value releases the key on drop.
    pub fn new(key: impl Into<String>, release: impl Send + Sync + 'static) -> Self {
        Self {
            key: key.into(),
            _release: Box::new(release),
        }
    }

    /// The held key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish_non_exhaustive()
    }
}
