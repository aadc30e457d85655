//! Read-side view contract.
//!
//! A view is whatever a projection writes into: a map, a table, a search
//! index. The projection needs only two things from it:
//!
//! - optionally, a [`ViewLock`] so that restore-time replay and live event
//!   delivery never interleave
//! - a [`View::projected`] hook, called after each live event is applied
//!
//! ## Readiness
//!
//! A lock-aware view starts out [`ViewStatus::Pending`]. The owning projection
//! marks it ready once its initial restore completes. Live events wait for
//! that. If a restore fails the view becomes [`ViewStatus::Failed`] and
//! [`ViewLock::once_ready`] reports [`Error::NotReady`] instead of waiting
//! forever.

use crate::error::{Error, Result};
use crate::event::Event;
use crate::lock::{Lock, LockGuard};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Readiness of a lock-aware view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewStatus {
    /// Restore has not completed yet.
    Pending,
    /// Restore completed; live events may be applied.
    Ready,
    /// The last restore failed.
    Failed,
}

/// Lock and readiness signal of a view.
pub struct ViewLock {
    locker: Arc<dyn Lock>,
    key: String,
    status: watch::Sender<ViewStatus>,
}

impl ViewLock {
    /// Create a pending view lock taking `key` on `locker`.
    pub fn new(locker: Arc<dyn Lock>, key: impl Into<String>) -> Self {
        let (status, _) = watch::channel(ViewStatus::Pending);
        Self {
            locker,
            key: key.into(),
            status,
        }
    }

    /// The lock key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Take the view's critical section.
    ///
    /// # Errors
    ///
    /// Propagates lock backend failures.
    pub async fn lock(&self) -> Result<LockGuard> {
        self.locker.acquire(&self.key).await
    }

    /// Current readiness.
    #[must_use]
    pub fn status(&self) -> ViewStatus {
        *self.status.borrow()
    }

    /// Wait until the view leaves [`ViewStatus::Pending`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if the view is (or becomes) failed.
    pub async fn once_ready(&self) -> Result<()> {
        let mut receiver = self.status.subscribe();
        let status = *receiver
            .wait_for(|status| *status != ViewStatus::Pending)
            .await
            .map_err(|_| Error::ChannelClosed)?;

        match status {
            ViewStatus::Failed => Err(Error::NotReady(self.key.clone())),
            ViewStatus::Ready | ViewStatus::Pending => Ok(()),
        }
    }

    /// Enter [`ViewStatus::Pending`].
    pub fn mark_pending(&self) {
        self.status.send_replace(ViewStatus::Pending);
    }

    /// Enter [`ViewStatus::Ready`], releasing everyone in `once_ready`.
    pub fn mark_ready(&self) {
        self.status.send_replace(ViewStatus::Ready);
    }

    /// Enter [`ViewStatus::Failed`], failing everyone in `once_ready`.
    pub fn mark_failed(&self) {
        self.status.send_replace(ViewStatus::Failed);
    }
}

impl fmt::Debug for ViewLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewLock")
            .field("key", &self.key)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// A read model maintained by a projection.
pub trait View: Send + Sync + 'static {
    /// The view's lock, when it is lock-aware.
    fn lock_state(&self) -> Option<&ViewLock> {
        None
    }

    /// Called after a live event has been applied to the view.
    fn projected(&self, _event: &Event) {}
}
