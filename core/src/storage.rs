//! Storage contracts consumed by the event store.
//!
//! This module defines the two persistence seams:
//!
//! - [`EventStorage`]: the append-only event log (required)
//! - [`SnapshotStorage`]: aggregate checkpoints (optional)
//!
//! Both are deliberately narrow. They persist and query; validation, saga
//! identity and publishing belong to the event store sitting in front of
//! them.
//!
//! # Implementations
//!
//! - `InMemoryEventStorage` / `InMemorySnapshotStorage` (in `eventide-testing`):
//!   fast, deterministic doubles for tests
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` rather than using `async fn` so that
//! the storages can be held as `Arc<dyn EventStorage>`.

use crate::error::Result;
use crate::event::Event;
use crate::identifier::Identifier;
use crate::stream::EventStream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed, sendable future returned by every contract in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Additional restriction for [`EventStorage::get_events`].
///
/// Fields left as `None` do not restrict the result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only events of this aggregate.
    pub aggregate_id: Option<Identifier>,
    /// Only events of this saga.
    pub saga_id: Option<Identifier>,
}

impl EventFilter {
    /// Restrict to one aggregate.
    #[must_use]
    pub fn aggregate(aggregate_id: Identifier) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            ..Self::default()
        }
    }

    /// Restrict to one saga.
    #[must_use]
    pub fn saga(saga_id: Identifier) -> Self {
        Self {
            saga_id: Some(saga_id),
            ..Self::default()
        }
    }

    /// Whether `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.aggregate_id
            .as_ref()
            .is_none_or(|id| event.aggregate_id.as_ref() == Some(id))
            && self
                .saga_id
                .as_ref()
                .is_none_or(|id| event.saga_id.as_ref() == Some(id))
    }
}

/// Append-only event log.
///
/// # Ordering
///
/// [`get_events`](Self::get_events) must return events in a stable order that
/// increases by `aggregateVersion` within each aggregate. Projections replay
/// in exactly this order.
///
/// # Atomicity
///
/// [`commit_events`](Self::commit_events) persists the whole batch or nothing.
pub trait EventStorage: Send + Sync {
    /// Persist a batch of already validated events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::Error::Storage) when the batch cannot
    /// be persisted, for example on a duplicate `(aggregateId, aggregateVersion)`.
    fn commit_events(&self, events: EventStream) -> BoxFuture<'_, Result<()>>;

    /// All events, optionally restricted to `event_types` and `filter`.
    ///
    /// `None` for `event_types` means every type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::Error::Storage) on read failure.
    fn get_events<'a>(
        &'a self,
        event_types: Option<&'a [String]>,
        filter: &'a EventFilter,
    ) -> BoxFuture<'a, Result<EventStream>>;

    /// Events of one aggregate ordered by version.
    ///
    /// When `snapshot` is given, only events with an `aggregateVersion`
    /// strictly greater than the snapshot's are returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::Error::Storage) on read failure.
    fn get_aggregate_events<'a>(
        &'a self,
        aggregate_id: &'a Identifier,
        snapshot: Option<&'a Event>,
    ) -> BoxFuture<'a, Result<EventStream>>;

    /// Events of one saga with a `sagaVersion` strictly lower than
    /// `before_event`'s, ordered by saga version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::Error::Storage) on read failure.
    fn get_saga_events<'a>(
        &'a self,
        saga_id: &'a Identifier,
        before_event: &'a Event,
    ) -> BoxFuture<'a, Result<EventStream>>;

    /// A fresh unique identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::Error::Storage) if the storage
    /// generates ids remotely and the call fails.
    fn get_new_id(&self) -> BoxFuture<'_, Result<Identifier>>;
}

/// Aggregate checkpoint storage.
pub trait SnapshotStorage: Send + Sync {
    /// The latest snapshot event of an aggregate, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::Error::Storage) on read failure.
    fn get_aggregate_snapshot<'a>(
        &'a self,
        aggregate_id: &'a Identifier,
    ) -> BoxFuture<'a, Result<Option<Arc<Event>>>>;

    /// Persist a snapshot event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`](crate::Error::Storage) on write failure.
    fn save_aggregate_snapshot(&self, snapshot: Arc<Event>) -> BoxFuture<'_, Result<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn empty_filter_matches_everything() {
        let event = Event::new("A", Value::Null);
        assert!(EventFilter::default().matches(&event));
    }

    #[test]
    fn aggregate_filter_matches_only_that_aggregate() {
        let filter = EventFilter::aggregate(Identifier::new("a-1"));
        let own = Event::new("A", Value::Null).for_aggregate(Identifier::new("a-1"), 0);
        let other = Event::new("A", Value::Null).for_aggregate(Identifier::new("a-2"), 0);

        assert!(filter.matches(&own));
        assert!(!filter.matches(&other));
    }
}
