//! Lock-aware in-memory view.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use eventide_core::{Error, Event, Identifier, Result, View, ViewLock, ViewStatus};
use eventide_runtime::InMemoryLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Key/value read model keyed by [`Identifier`].
///
/// The view is lock-aware: a projection restoring into it holds its lock and
/// marks it ready afterwards, and [`get`](Self::get) waits for that.
/// [`read`](Self::read) does not wait.
///
/// # Example
///
/// ```
/// use eventide_testing::InMemoryView;
/// use eventide_core::Identifier;
///
/// let view: InMemoryView<String> = InMemoryView::new();
/// view.create(Identifier::new("post-1"), "Lorem Ipsum".to_string()).unwrap();
/// assert_eq!(view.read(&Identifier::new("post-1")), Some("Lorem Ipsum".to_string()));
/// ```
pub struct InMemoryView<T> {
    records: RwLock<BTreeMap<Identifier, T>>,
    lock: ViewLock,
    projected: broadcast::Sender<Arc<Event>>,
}

impl<T: Clone + Send + Sync + 'static> InMemoryView<T> {
    /// Create an empty, pending view with its own lock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock(Arc::new(InMemoryLock::new()), "in-memory-view")
    }

    /// Create an empty, pending view locking `key` on a shared lock.
    #[must_use]
    pub fn with_lock(locker: Arc<InMemoryLock>, key: impl Into<String>) -> Self {
        let (projected, _) = broadcast::channel(256);
        Self {
            records: RwLock::new(BTreeMap::new()),
            lock: ViewLock::new(locker, key),
            projected,
        }
    }

    /// Whether the owning projection finished restoring.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.lock.status() == ViewStatus::Ready
    }

    /// Read a record once the view is ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if the view's restore failed.
    pub async fn get(&self, id: &Identifier) -> Result<Option<T>> {
        self.lock.once_ready().await?;
        Ok(self.read(id))
    }

    /// Read a record without waiting for readiness.
    #[must_use]
    pub fn read(&self, id: &Identifier) -> Option<T> {
        self.records.read().unwrap().get(id).cloned()
    }

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if `id` already exists.
    pub fn create(&self, id: Identifier, record: T) -> Result<()> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&id) {
            return Err(Error::Storage(format!("record '{id}' already exists")));
        }
        records.insert(id, record);
        Ok(())
    }

    /// Modify an existing record in place.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if `id` does not exist.
    pub fn update(&self, id: &Identifier, update: impl FnOnce(&mut T)) -> Result<()> {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::Storage(format!("record '{id}' does not exist")))?;
        update(record);
        Ok(())
    }

    /// Replace a record with `update(previous)`, creating it when absent.
    pub fn upsert(&self, id: Identifier, update: impl FnOnce(Option<T>) -> T) {
        let mut records = self.records.write().unwrap();
        let previous = records.remove(&id);
        records.insert(id, update(previous));
    }

    /// Remove a record, returning it.
    pub fn delete(&self, id: &Identifier) -> Option<T> {
        self.records.write().unwrap().remove(id)
    }

    /// Remove every record.
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }

    /// Every record ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<(Identifier, T)> {
        self.records
            .read()
            .unwrap()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether the view holds no record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Resolve after the next live event of `event_type` has been projected.
    ///
    /// The subscription is taken when this method is called.
    pub fn once(
        &self,
        event_type: impl Into<String>,
    ) -> impl Future<Output = Result<Arc<Event>>> + Send + 'static {
        let event_type = event_type.into();
        let mut receiver = self.projected.subscribe();

        async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.event_type == event_type => return Ok(event),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::ChannelClosed),
                }
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for InMemoryView<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> View for InMemoryView<T> {
    fn lock_state(&self) -> Option<&ViewLock> {
        Some(&self.lock)
    }

    fn projected(&self, event: &Event) {
        let _ = self.projected.send(Arc::new(event.clone()));
    }
}

impl<T> std::fmt::Debug for InMemoryView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryView")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn create_refuses_existing_ids() {
        let view: InMemoryView<u32> = InMemoryView::new();
        let id = Identifier::new("a-1");

        view.create(id.clone(), 1).unwrap();
        assert!(matches!(view.create(id.clone(), 2), Err(Error::Storage(_))));
        assert_eq!(view.read(&id), Some(1));
    }

    #[test]
    fn update_and_upsert() {
        let view: InMemoryView<u32> = InMemoryView::new();
        let id = Identifier::new("a-1");

        assert!(view.update(&id, |n| *n += 1).is_err());
        view.upsert(id.clone(), |previous| previous.unwrap_or_default() + 5);
        view.update(&id, |n| *n += 1).unwrap();

        assert_eq!(view.list(), vec![(id.clone(), 6)]);
        assert_eq!(view.delete(&id), Some(6));
        assert!(view.is_empty());
    }

    #[tokio::test]
    async fn get_waits_for_ready() {
        let view: Arc<InMemoryView<u32>> = Arc::new(InMemoryView::new());
        view.create(Identifier::new("a-1"), 7).unwrap();

        let reader = tokio::spawn({
            let view = Arc::clone(&view);
            async move { view.get(&Identifier::new("a-1")).await }
        });
        tokio::task::yield_now().await;
        assert!(!reader.is_finished());

        view.lock_state().unwrap().mark_ready();
        assert_eq!(reader.await.unwrap(), Ok(Some(7)));
        assert!(view.ready());
    }

    #[tokio::test]
    async fn once_resolves_after_projected() {
        let view: InMemoryView<u32> = InMemoryView::new();
        let next = view.once("EventCreated");

        view.projected(&Event::new("EventChanged", Value::Null));
        view.projected(&Event::new("EventCreated", Value::Null));

        assert_eq!(next.await.unwrap().event_type, "EventCreated");
    }
}
