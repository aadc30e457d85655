//! In-memory event and snapshot storages.
//!
//! Fast, deterministic stand-ins for a database-backed [`EventStorage`] and
//! [`SnapshotStorage`]:
//! - [`InMemoryEventStorage`]: insertion-ordered log, unique
//!   `(aggregateId, aggregateVersion)`, uuid v4 ids
//! - [`InMemorySnapshotStorage`]: keeps every snapshot, serves the latest

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use eventide_core::{
    BoxFuture, Error, Event, EventFilter, EventStorage, EventStream, Identifier, Result,
    SnapshotStorage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// In-memory event log.
///
/// # Example
///
/// ```
/// use eventide_testing::InMemoryEventStorage;
/// use eventide_core::{Event, EventStorage, EventStream, Identifier};
/// use serde_json::Value;
///
/// # async fn example() -> eventide_core::Result<()> {
/// let storage = InMemoryEventStorage::new();
/// let event = Event::new("EventCreated", Value::Null).for_aggregate(Identifier::new("a-1"), 0);
/// storage.commit_events(EventStream::from(vec![event])).await?;
/// assert_eq!(storage.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStorage {
    events: Arc<RwLock<Vec<Arc<Event>>>>,
    commit_calls: Arc<AtomicUsize>,
}

impl InMemoryEventStorage {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Whether nothing has been persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().unwrap().is_empty()
    }

    /// Every persisted event in insertion order.
    #[must_use]
    pub fn events(&self) -> EventStream {
        self.events.read().unwrap().iter().cloned().collect()
    }

    /// How many times `commit_events` was called, successful or not.
    ///
    /// Useful to assert that a rejected batch never reached storage.
    #[must_use]
    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Drop every event (for test isolation).
    pub fn clear(&self) {
        self.events.write().unwrap().clear();
    }
}

fn same_slot(a: &Event, b: &Event) -> bool {
    a.aggregate().is_some()
        && a.aggregate_id == b.aggregate_id
        && a.aggregate_version == b.aggregate_version
}

impl EventStorage for InMemoryEventStorage {
    fn commit_events(&self, events: EventStream) -> BoxFuture<'_, Result<()>> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);

        Box::pin(async move {
            let mut stored = self.events.write().unwrap();

            for (position, event) in events.iter().enumerate() {
                let taken = stored.iter().any(|existing| same_slot(existing, event))
                    || events[..position].iter().any(|earlier| same_slot(earlier, event));
                if taken {
                    return Err(Error::Storage(format!(
                        "duplicate aggregate version: {} v{}",
                        event.aggregate_id.as_ref().map(ToString::to_string).unwrap_or_default(),
                        event.aggregate_version
                    )));
                }
            }

            stored.extend(events.iter().cloned());
            Ok(())
        })
    }

    fn get_events<'a>(
        &'a self,
        event_types: Option<&'a [String]>,
        filter: &'a EventFilter,
    ) -> BoxFuture<'a, Result<EventStream>> {
        Box::pin(async move {
            let stored = self.events.read().unwrap();
            Ok(stored
                .iter()
                .filter(|e| event_types.is_none_or(|types| types.contains(&e.event_type)))
                .filter(|e| filter.matches(e))
                .cloned()
                .collect())
        })
    }

    fn get_aggregate_events<'a>(
        &'a self,
        aggregate_id: &'a Identifier,
        snapshot: Option<&'a Event>,
    ) -> BoxFuture<'a, Result<EventStream>> {
        Box::pin(async move {
            let stored = self.events.read().unwrap();
            Ok(stored
                .iter()
                .filter(|e| e.aggregate() == Some(aggregate_id))
                .filter(|e| snapshot.is_none_or(|s| e.aggregate_version > s.aggregate_version))
                .cloned()
                .collect())
        })
    }

    fn get_saga_events<'a>(
        &'a self,
        saga_id: &'a Identifier,
        before_event: &'a Event,
    ) -> BoxFuture<'a, Result<EventStream>> {
        Box::pin(async move {
            let Some(before) = before_event.saga_version else {
                return Err(Error::MissingArgument("beforeEvent.sagaVersion"));
            };

            let stored = self.events.read().unwrap();
            let mut events: Vec<Arc<Event>> = stored
                .iter()
                .filter(|e| e.saga() == Some(saga_id))
                .filter(|e| e.saga_version.is_some_and(|v| v < before))
                .cloned()
                .collect();
            events.sort_by_key(|e| e.saga_version);
            Ok(EventStream::from(events))
        })
    }

    fn get_new_id(&self) -> BoxFuture<'_, Result<Identifier>> {
        Box::pin(async { Ok(Identifier::new(Uuid::new_v4().to_string())) })
    }
}

/// In-memory snapshot storage keeping the full snapshot history.
#[derive(Clone, Debug, Default)]
pub struct InMemorySnapshotStorage {
    snapshots: Arc<RwLock<Vec<Arc<Event>>>>,
}

impl InMemorySnapshotStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every saved snapshot, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Event>> {
        self.snapshots.read().unwrap().clone()
    }

    /// Saved snapshots of one aggregate, oldest first.
    #[must_use]
    pub fn for_aggregate(&self, aggregate_id: &Identifier) -> Vec<Arc<Event>> {
        self.snapshots
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.aggregate() == Some(aggregate_id))
            .cloned()
            .collect()
    }

    /// Number of saved snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.read().unwrap().len()
    }

    /// Whether no snapshot was saved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().unwrap().is_empty()
    }
}

impl SnapshotStorage for InMemorySnapshotStorage {
    fn get_aggregate_snapshot<'a>(
        &'a self,
        aggregate_id: &'a Identifier,
    ) -> BoxFuture<'a, Result<Option<Arc<Event>>>> {
        Box::pin(async move { Ok(self.for_aggregate(aggregate_id).pop()) })
    }

    fn save_aggregate_snapshot(&self, snapshot: Arc<Event>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if snapshot.aggregate().is_none() {
                return Err(Error::MissingArgument("snapshot.aggregateId"));
            }
            self.snapshots.write().unwrap().push(snapshot);
            Ok(())
        })
    }
}
