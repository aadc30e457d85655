//! The event value type.
//!
//! Events are immutable facts. Field names follow the wire/storage format
//! (`aggregateId`, `aggregateVersion`, `type`, `payload`, `aggregateTimestamp`,
//! `context`, `sagaId`, `sagaVersion`) so that any JSON-compatible adapter can
//! persist and exchange them without a mapping layer.
//!
//! # Example
//!
//! ```
//! use eventide_core::{Event, Identifier};
//! use serde_json::json;
//!
//! let event = Event::new("OrderPlaced", json!({ "total": 42 }))
//!     .for_aggregate(Identifier::new("order-1"), 0);
//!
//! let wire = serde_json::to_value(&event).unwrap();
//! assert_eq!(wire["type"], "OrderPlaced");
//! assert_eq!(wire["aggregateId"], "order-1");
//! ```

use crate::identifier::Identifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Event type reserved for aggregate state checkpoints.
pub const SNAPSHOT_EVENT_TYPE: &str = "snapshot";

/// A persisted or in-flight domain event.
///
/// An event may carry both an aggregate id and a saga id: aggregate events that
/// enter a saga get a saga id attached at commit time.
///
/// Once an event is placed in an [`EventStream`](crate::EventStream) it is shared
/// behind an `Arc` and can no longer be modified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Aggregate that emitted the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_id: Option<Identifier>,

    /// Position of the event in its aggregate's history (0-based).
    #[serde(default)]
    pub aggregate_version: u64,

    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Arbitrary event data.
    #[serde(default)]
    pub payload: Value,

    /// When the aggregate emitted the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_timestamp: Option<DateTime<Utc>>,

    /// Caller context copied from the originating command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Saga the event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saga_id: Option<Identifier>,

    /// Position of the event in its saga's history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saga_version: Option<u64>,
}

impl Event {
    /// Create an event of the given type with no aggregate or saga binding.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            aggregate_id: None,
            aggregate_version: 0,
            event_type: event_type.into(),
            payload,
            aggregate_timestamp: None,
            context: None,
            saga_id: None,
            saga_version: None,
        }
    }

    /// Bind the event to an aggregate at a version.
    #[must_use]
    pub fn for_aggregate(mut self, aggregate_id: Identifier, aggregate_version: u64) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self.aggregate_version = aggregate_version;
        self
    }

    /// Bind the event to a saga at a version.
    #[must_use]
    pub fn with_saga(mut self, saga_id: Identifier, saga_version: u64) -> Self {
        self.saga_id = Some(saga_id);
        self.saga_version = Some(saga_version);
        self
    }

    /// Attach caller context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the emission timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.aggregate_timestamp = Some(timestamp);
        self
    }

    /// Whether this is an aggregate snapshot checkpoint.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.event_type == SNAPSHOT_EVENT_TYPE
    }

    /// Aggregate id, treating the empty identifier as absent.
    #[must_use]
    pub fn aggregate(&self) -> Option<&Identifier> {
        self.aggregate_id.as_ref().filter(|id| !id.is_empty())
    }

    /// Saga id, treating the empty identifier as absent.
    #[must_use]
    pub fn saga(&self) -> Option<&Identifier> {
        self.saga_id.as_ref().filter(|id| !id.is_empty())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.event_type)?;
        if let Some(id) = self.aggregate() {
            write!(f, " {id} (v{})", self.aggregate_version)?;
        }
        if let (Some(saga_id), Some(version)) = (self.saga(), self.saga_version) {
            write!(f, " saga {saga_id} (v{version})")?;
        }
        Ok(())
    }
}
