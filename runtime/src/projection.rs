//! Projections: read models built from history, then kept current.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──subscribe──► Restoring ──► Ready ◄──┐
//!                                   │                 │ restore()
//!                                   └──► Failed ──────┘
//! ```
//!
//! `subscribe` registers [`Projection::project`] for the handled event types
//! and then replays history. When the view is lock-aware, live events wait
//! for the replay to finish and never interleave with it: both sides take
//! the view's lock, and live events additionally wait for readiness.
//!
//! A failed restore releases the lock, marks the view failed and leaves the
//! projection in [`ProjectionState::Failed`]; live events are refused with
//! [`Error::NotReady`] until a later [`Projection::restore`] succeeds.

use crate::event_store::EventStore;
use crate::metrics::ProjectionMetrics;
use crate::subscribe::subscribe;
use eventide_core::{
    BoxFuture, Error, Event, HandlerRegistry, LockGuard, Result, View, event_handler,
};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// Synchronous projection handler.
pub type SyncProjectFn<V> = fn(&V, &Event) -> Result<()>;

/// Asynchronous projection handler.
pub type AsyncProjectFn<V> = for<'a> fn(&'a V, &'a Event) -> BoxFuture<'a, Result<()>>;

/// A registered projection handler.
pub enum ProjectionHandler<V: View> {
    /// Runs to completion without suspending.
    Sync(SyncProjectFn<V>),
    /// Awaited while the view lock is held.
    Async(AsyncProjectFn<V>),
}

impl<V: View> Clone for ProjectionHandler<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V: View> Copy for ProjectionHandler<V> {}

/// Shared description of a projection.
pub struct ProjectionDefinition<V: View> {
    name: String,
    handlers: HandlerRegistry<ProjectionHandler<V>>,
    declared: Option<Vec<String>>,
    restore_on_subscribe: bool,
}

impl<V: View> ProjectionDefinition<V> {
    /// Start describing a projection.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HandlerRegistry::new(),
            declared: None,
            restore_on_subscribe: true,
        }
    }

    /// Register a synchronous handler.
    #[must_use]
    pub fn on(mut self, event_type: impl Into<String>, handler: SyncProjectFn<V>) -> Self {
        self.handlers.insert(event_type, ProjectionHandler::Sync(handler));
        self
    }

    /// Register an asynchronous handler.
    #[must_use]
    pub fn on_async(mut self, event_type: impl Into<String>, handler: AsyncProjectFn<V>) -> Self {
        self.handlers.insert(event_type, ProjectionHandler::Async(handler));
        self
    }

    /// Declare the handled event types explicitly.
    #[must_use]
    pub fn with_handles<I, T>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.declared = Some(event_types.into_iter().map(Into::into).collect());
        self
    }

    /// Whether `subscribe` replays history. Defaults to `true`; without it the
    /// view is marked ready immediately.
    #[must_use]
    pub const fn with_restore_on_subscribe(mut self, restore: bool) -> Self {
        self.restore_on_subscribe = restore;
        self
    }

    /// Validate declared handlers and freeze the definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerNotFound`] for a declared type without handler.
    pub fn build(self) -> Result<Arc<Self>> {
        if let Some(declared) = &self.declared {
            self.handlers.ensure_handles(declared)?;
        }
        Ok(Arc::new(self))
    }

    /// Handled event types: the declared list, or every public handler name.
    #[must_use]
    pub fn handles(&self) -> Vec<String> {
        self.declared
            .clone()
            .unwrap_or_else(|| self.handlers.public_names())
    }
}

impl<V: View> fmt::Debug for ProjectionDefinition<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionDefinition")
            .field("name", &self.name)
            .field("handles", &self.handles())
            .field("restore_on_subscribe", &self.restore_on_subscribe)
            .finish_non_exhaustive()
    }
}

/// Where a projection is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectionState {
    /// Not subscribed yet.
    Uninitialized,
    /// Replaying history.
    Restoring,
    /// Applying live events.
    Ready,
    /// The last restore failed.
    Failed,
}

/// A projection bound to its view.
pub struct Projection<V: View> {
    inner: Arc<Inner<V>>,
}

struct Inner<V: View> {
    name: String,
    definition: Arc<ProjectionDefinition<V>>,
    view: Arc<V>,
    state: RwLock<ProjectionState>,
}

impl<V: View> Clone for Projection<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: View> Projection<V> {
    /// Bind `definition` to `view`.
    #[must_use]
    pub fn new(definition: Arc<ProjectionDefinition<V>>, view: V) -> Self {
        Self::with_shared_view(definition, Arc::new(view))
    }

    /// Bind `definition` to a view shared with other owners.
    #[must_use]
    pub fn with_shared_view(definition: Arc<ProjectionDefinition<V>>, view: Arc<V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: definition.name.to_lowercase(),
                definition,
                view,
                state: RwLock::new(ProjectionState::Uninitialized),
            }),
        }
    }

    /// Lowercased projection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The view.
    #[must_use]
    pub fn view(&self) -> &Arc<V> {
        &self.inner.view
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProjectionState {
        *self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ProjectionState) {
        *self.inner.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Handled event types.
    #[must_use]
    pub fn handles(&self) -> Vec<String> {
        self.inner.definition.handles()
    }

    /// Register [`project`](Self::project) for every handled type, then
    /// restore (or mark the view ready when restoring on subscribe is off).
    ///
    /// # Errors
    ///
    /// The bus's registration error or the restore error.
    pub async fn subscribe(&self, event_store: &EventStore) -> Result<()> {
        let projection = self.clone();
        let handler = event_handler(move |event| {
            let projection = projection.clone();
            async move { projection.project(&event).await }
        });
        subscribe(event_store, &self.handles(), None, &handler)?;

        if self.inner.definition.restore_on_subscribe {
            self.restore(event_store).await
        } else {
            self.set_state(ProjectionState::Ready);
            if let Some(lock) = self.inner.view.lock_state() {
                lock.mark_ready();
            }
            Ok(())
        }
    }

    /// Apply one live event.
    ///
    /// With a lock-aware view this waits for readiness and holds the view
    /// lock while the handler runs.
    ///
    /// # Errors
    ///
    /// [`Error::NotReady`] after a failed restore, [`Error::HandlerNotFound`]
    /// for an unhandled type, or the handler's error.
    pub async fn project(&self, event: &Event) -> Result<()> {
        if self.state() == ProjectionState::Failed {
            return Err(Error::NotReady(self.inner.name.clone()));
        }

        match self.inner.view.lock_state() {
            Some(lock) => {
                lock.once_ready().await?;
                let _guard = lock.lock().await?;
                self.apply(event).await?;
            }
            None => self.apply(event).await?,
        }

        self.inner.view.projected(event);
        ProjectionMetrics::record_projected(&self.inner.name);
        Ok(())
    }

    async fn apply(&self, event: &Event) -> Result<()> {
        let handler = *self.inner.definition.handlers.require(&event.event_type)?;
        let view = self.inner.view.as_ref();
        match handler {
            ProjectionHandler::Sync(handle) => handle(view, event),
            ProjectionHandler::Async(handle) => handle(view, event).await,
        }
    }

    /// Rebuild the view from every persisted event of the handled types.
    ///
    /// May be called again at any time, e.g. after the view was wiped.
    ///
    /// # Errors
    ///
    /// Lock, storage or handler failures. The view lock is released and the
    /// projection is left [`ProjectionState::Failed`].
    #[tracing::instrument(skip(self, event_store), fields(projection = %self.inner.name))]
    pub async fn restore(&self, event_store: &EventStore) -> Result<()> {
        self.set_state(ProjectionState::Restoring);
        tracing::debug!("Retrieving events and restoring projection");
        let started = Instant::now();

        match self.replay(event_store).await {
            Ok(count) => {
                self.set_state(ProjectionState::Ready);
                if let Some(lock) = self.inner.view.lock_state() {
                    lock.mark_ready();
                }
                ProjectionMetrics::record_restore(&self.inner.name, started.elapsed());
                tracing::info!(events = count, "Projection view restored");
                Ok(())
            }
            Err(error) => {
                self.set_state(ProjectionState::Failed);
                if let Some(lock) = self.inner.view.lock_state() {
                    lock.mark_failed();
                }
                ProjectionMetrics::record_restore_failure(&self.inner.name);
                tracing::error!(error = %error, "Projection view restore has failed");
                Err(error)
            }
        }
    }

    async fn replay(&self, event_store: &EventStore) -> Result<usize> {
        let _guard: Option<LockGuard> = match self.inner.view.lock_state() {
            Some(lock) => {
                let guard = lock.lock().await?;
                lock.mark_pending();
                Some(guard)
            }
            None => None,
        };

        let event_types = self.handles();
        let events = event_store.get_all_events(Some(event_types.as_slice()), None).await?;
        for event in &events {
            self.apply(event).await?;
        }
        Ok(events.len())
    }
}

impl<V: View> fmt::Debug for Projection<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projection")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
