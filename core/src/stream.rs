//! Immutable ordered collections of events.
//!
//! An [`EventStream`] is fixed once built. Its elements are shared `Arc<Event>`
//! handles, so cloning a stream or deriving a new one through
//! [`EventStream::filter`] never copies event data and never touches the
//! source sequence.

use crate::event::Event;
use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// An ordered, immutable sequence of events.
///
/// # Examples
///
/// ```
/// use eventide_core::{Event, EventStream};
/// use serde_json::Value;
///
/// let stream = EventStream::from(vec![
///     Event::new("EventCreated", Value::Null),
///     Event::new("EventChanged", Value::Null),
/// ]);
///
/// let created = stream.filter(|e| e.event_type == "EventCreated");
/// assert_eq!(created.len(), 1);
/// assert_eq!(stream.len(), 2);
/// ```
#[derive(Clone, Default, PartialEq)]
pub struct EventStream(Arc<[Arc<Event>]>);

impl EventStream {
    /// An empty stream.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of events in the stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the stream holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the shared event handles in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Event>> {
        self.0.iter()
    }

    /// Derive a new stream containing the events that match `predicate`.
    #[must_use]
    pub fn filter(&self, mut predicate: impl FnMut(&Event) -> bool) -> Self {
        self.0
            .iter()
            .filter(|event| predicate(event))
            .cloned()
            .collect()
    }

    /// Collect `f(event)` for every event, preserving order.
    pub fn map<T>(&self, f: impl FnMut(&Event) -> T) -> Vec<T> {
        self.0.iter().map(|event| event.as_ref()).map(f).collect()
    }

    /// Event types in stream order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&str> {
        self.0.iter().map(|event| event.event_type.as_str()).collect()
    }

    /// Build a new stream with `event` appended.
    #[must_use]
    pub fn appended(&self, event: impl Into<Arc<Event>>) -> Self {
        self.0.iter().cloned().chain(std::iter::once(event.into())).collect()
    }
}

impl Deref for EventStream {
    type Target = [Arc<Event>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<Arc<Event>> for EventStream {
    fn from_iter<I: IntoIterator<Item = Arc<Event>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromIterator<Event> for EventStream {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        iter.into_iter().map(Arc::new).collect()
    }
}

impl From<Vec<Event>> for EventStream {
    fn from(events: Vec<Event>) -> Self {
        events.into_iter().collect()
    }
}

impl From<Vec<Arc<Event>>> for EventStream {
    fn from(events: Vec<Arc<Event>>) -> Self {
        Self(events.into())
    }
}

impl<'a> IntoIterator for &'a EventStream {
    type Item = &'a Arc<Event>;
    type IntoIter = std::slice::Iter<'a, Arc<Event>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for EventStream {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(AsRef::as_ref))
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl fmt::Display for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_ref() {
            [] => write!(f, "empty stream"),
            [single] => write!(f, "{single}"),
            [first, .., last] => write!(f, "{} events from {first} to {last}", self.0.len()),
        }
    }
}
