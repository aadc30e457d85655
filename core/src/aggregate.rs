//! Aggregates: write-side state machines.
//!
//! An aggregate instance lives for one command. It is rebuilt from its event
//! history (optionally starting from a snapshot), handles the command by
//! emitting zero or more events, and is dropped once those events have been
//! committed.
//!
//! # Pieces
//!
//! - [`AggregateState`]: the reducer. `mutate` folds one event into the state;
//!   `snapshot` / `restore` are its explicit serialize pair.
//! - [`AggregateDefinition`]: name, command handlers, snapshot policy and clock,
//!   built once and shared by every instance.
//! - [`Aggregate`]: one instance with its id, version and pending changes.
//!
//! # Example
//!
//! ```
//! use eventide_core::aggregate::{
//!     Aggregate, AggregateDefinition, AggregateOptions, AggregateState,
//! };
//! use eventide_core::{Command, Event, Identifier, Result};
//! use serde_json::{Value, json};
//!
//! #[derive(Default)]
//! struct Counter(u64);
//!
//! impl AggregateState for Counter {
//!     fn mutate(&mut self, event: &Event) {
//!         if event.event_type == "Incremented" {
//!             self.0 += 1;
//!         }
//!     }
//!     fn snapshot(&self) -> Result<Value> {
//!         Ok(json!(self.0))
//!     }
//!     fn restore(snapshot: &Value) -> Result<Self> {
//!         Ok(Self(snapshot.as_u64().unwrap_or_default()))
//!     }
//! }
//!
//! fn increment(aggregate: &mut Aggregate<Counter>, _command: &Command) -> Result<()> {
//!     aggregate.emit("Incremented", Value::Null)
//! }
//!
//! # fn main() -> Result<()> {
//! let definition = AggregateDefinition::new("Counter")
//!     .command("increment", increment)
//!     .build()?;
//!
//! let mut counter = Aggregate::new(definition, AggregateOptions::new(Identifier::new("c-1")))?;
//! # let _ = &mut counter;
//! # Ok(())
//! # }
//! ```

use crate::command::Command;
use crate::environment::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::event::{Event, SNAPSHOT_EVENT_TYPE};
use crate::handlers::HandlerRegistry;
use crate::identifier::Identifier;
use crate::storage::BoxFuture;
use crate::stream::EventStream;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// State owned by an aggregate.
pub trait AggregateState: Default + Send + Sync + 'static {
    /// Fold a (non-snapshot) event into the state. Unknown types are ignored.
    fn mutate(&mut self, event: &Event);

    /// Serialize the state into a snapshot payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Snapshot`] if the state cannot be serialized.
    fn snapshot(&self) -> Result<Value>;

    /// Rebuild the state from a snapshot payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Snapshot`] if the payload does not describe a state.
    fn restore(snapshot: &Value) -> Result<Self>;
}

/// Synchronous command handler.
pub type SyncCommandFn<S> = fn(&mut Aggregate<S>, &Command) -> Result<()>;

/// Asynchronous command handler.
pub type AsyncCommandFn<S> =
    for<'a> fn(&'a mut Aggregate<S>, &'a Command) -> BoxFuture<'a, Result<()>>;

/// A registered command handler.
pub enum AggregateHandler<S: AggregateState> {
    /// Runs to completion without suspending.
    Sync(SyncCommandFn<S>),
    /// Returns a future that is awaited before changes are read.
    Async(AsyncCommandFn<S>),
}

impl<S: AggregateState> Clone for AggregateHandler<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: AggregateState> Copy for AggregateHandler<S> {}

impl<S: AggregateState> fmt::Debug for AggregateHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => write!(f, "AggregateHandler::Sync"),
            Self::Async(_) => write!(f, "AggregateHandler::Async"),
        }
    }
}

/// When an aggregate should append a snapshot to its changes.
#[derive(Clone, Copy, Debug, Default)]
pub enum SnapshotPolicy {
    /// Never snapshot.
    #[default]
    Never,
    /// Snapshot once `version - snapshot_version` exceeds the threshold.
    AfterVersions(u64),
    /// Decide from `(version, snapshot_version)`.
    Custom(fn(u64, u64) -> bool),
}

impl SnapshotPolicy {
    /// Apply the policy.
    #[must_use]
    pub fn should_take(&self, version: u64, snapshot_version: u64) -> bool {
        match self {
            Self::Never => false,
            Self::AfterVersions(threshold) => version.saturating_sub(snapshot_version) > *threshold,
            Self::Custom(decide) => decide(version, snapshot_version),
        }
    }
}

/// Shared description of an aggregate type.
pub struct AggregateDefinition<S: AggregateState> {
    name: String,
    handlers: HandlerRegistry<AggregateHandler<S>>,
    declared: Option<Vec<String>>,
    snapshot_policy: SnapshotPolicy,
    namespaced_ids: bool,
    clock: Arc<dyn Clock>,
}

impl<S: AggregateState> AggregateDefinition<S> {
    /// Start describing an aggregate type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HandlerRegistry::new(),
            declared: None,
            snapshot_policy: SnapshotPolicy::Never,
            namespaced_ids: false,
            clock: Arc::new(SystemClock),
        }
    }

    /// Register a synchronous command handler.
    ///
    /// Prefix `command_type` with `_` to keep it out of the handled types
    /// while still dispatching it.
    #[must_use]
    pub fn command(mut self, command_type: impl Into<String>, handler: SyncCommandFn<S>) -> Self {
        self.handlers.insert(command_type, AggregateHandler::Sync(handler));
        self
    }

    /// Register an asynchronous command handler.
    #[must_use]
    pub fn command_async(
        mut self,
        command_type: impl Into<String>,
        handler: AsyncCommandFn<S>,
    ) -> Self {
        self.handlers.insert(command_type, AggregateHandler::Async(handler));
        self
    }

    /// Declare the handled command types explicitly.
    #[must_use]
    pub fn with_handles<I, T>(mut self, command_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.declared = Some(command_types.into_iter().map(Into::into).collect());
        self
    }

    /// Set the snapshot policy.
    #[must_use]
    pub const fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    /// Namespace ids of newly created aggregates with the lowercased name.
    #[must_use]
    pub const fn with_namespaced_ids(mut self) -> Self {
        self.namespaced_ids = true;
        self
    }

    /// Use `clock` for event timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
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

    /// Aggregate type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command types routed to this aggregate: the declared list, or every
    /// public handler name.
    #[must_use]
    pub fn handles(&self) -> Vec<String> {
        self.declared
            .clone()
            .unwrap_or_else(|| self.handlers.public_names())
    }

    /// The snapshot policy.
    #[must_use]
    pub const fn snapshot_policy(&self) -> &SnapshotPolicy {
        &self.snapshot_policy
    }

    /// Turn a storage-generated id into this aggregate's id.
    #[must_use]
    pub fn assign_id(&self, raw: Identifier) -> Identifier {
        if self.namespaced_ids {
            Identifier::namespaced(&self.name, raw)
        } else {
            raw
        }
    }

    /// A factory building instances of this definition.
    #[must_use]
    pub fn factory(self: &Arc<Self>) -> AggregateFactory<S> {
        let definition = Arc::clone(self);
        Arc::new(move |options| Aggregate::new(Arc::clone(&definition), options))
    }
}

impl<S: AggregateState> fmt::Debug for AggregateDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateDefinition")
            .field("name", &self.name)
            .field("handles", &self.handles())
            .field("snapshot_policy", &self.snapshot_policy)
            .finish_non_exhaustive()
    }
}

/// Construction input of an aggregate instance.
#[derive(Clone, Debug)]
pub struct AggregateOptions {
    /// Aggregate id.
    pub id: Identifier,
    /// History to replay, snapshot first when present.
    pub events: EventStream,
}

impl AggregateOptions {
    /// A fresh aggregate with no history.
    #[must_use]
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            events: EventStream::empty(),
        }
    }

    /// Replay `events` on construction.
    #[must_use]
    pub fn with_events(mut self, events: EventStream) -> Self {
        self.events = events;
        self
    }
}

/// Builds aggregate instances.
pub type AggregateFactory<S> =
    Arc<dyn Fn(AggregateOptions) -> Result<Aggregate<S>> + Send + Sync>;

/// One aggregate instance.
pub struct Aggregate<S: AggregateState> {
    definition: Arc<AggregateDefinition<S>>,
    id: Identifier,
    version: u64,
    snapshot_version: u64,
    state: S,
    changes: Vec<Arc<Event>>,
    command: Option<Command>,
}

impl<S: AggregateState> Aggregate<S> {
    /// Create an instance and replay `options.events`.
    ///
    /// The changes buffer is empty afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingArgument`] for an empty id, or the snapshot
    /// restore error of a malformed snapshot event.
    pub fn new(definition: Arc<AggregateDefinition<S>>, options: AggregateOptions) -> Result<Self> {
        if options.id.is_empty() {
            return Err(Error::MissingArgument("id"));
        }

        let mut aggregate = Self {
            definition,
            id: options.id,
            version: 0,
            snapshot_version: 0,
            state: S::default(),
            changes: Vec::new(),
            command: None,
        };
        for event in &options.events {
            aggregate.mutate(event)?;
        }
        Ok(aggregate)
    }

    /// Aggregate id.
    #[must_use]
    pub const fn id(&self) -> &Identifier {
        &self.id
    }

    /// Number of events applied so far, snapshots included.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Version at which the last snapshot was taken.
    #[must_use]
    pub const fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// The definition this instance was built from.
    #[must_use]
    pub fn definition(&self) -> &AggregateDefinition<S> {
        &self.definition
    }

    /// Events emitted since construction.
    #[must_use]
    pub fn changes(&self) -> EventStream {
        EventStream::from(self.changes.clone())
    }

    /// Whether the snapshot policy asks for a snapshot now.
    #[must_use]
    pub fn should_take_snapshot(&self) -> bool {
        self.definition
            .snapshot_policy
            .should_take(self.version, self.snapshot_version)
    }

    /// Dispatch `command` to its registered handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerNotFound`] for an unknown command type, or
    /// whatever the handler returns.
    pub async fn handle(&mut self, command: &Command) -> Result<()> {
        command.validate()?;
        let handler = *self.definition.handlers.require(&command.command_type)?;
        self.command = Some(command.clone());

        match handler {
            AggregateHandler::Sync(handle) => handle(self, command),
            AggregateHandler::Async(handle) => handle(self, command).await,
        }
    }

    /// Apply one event to state and version.
    ///
    /// A snapshot event replaces the state and records the snapshot version;
    /// any other event goes through [`AggregateState::mutate`]. Either way the
    /// version becomes `event.aggregate_version + 1`.
    ///
    /// # Errors
    ///
    /// Returns the restore error of a malformed snapshot.
    pub fn mutate(&mut self, event: &Event) -> Result<()> {
        self.version = event.aggregate_version;

        if event.is_snapshot() {
            self.state = S::restore(&event.payload)?;
            self.snapshot_version = event.aggregate_version;
        } else {
            self.state.mutate(event);
        }

        self.version += 1;
        Ok(())
    }

    /// Build an event from the current version and command, apply it and
    /// record it as a change.
    ///
    /// # Errors
    ///
    /// See [`emit_raw`](Self::emit_raw).
    pub fn emit(&mut self, event_type: impl Into<String>, payload: Value) -> Result<()> {
        let event = self.make_event(event_type, payload);
        self.emit_raw(event)
    }

    /// A well-formed event at the current version, stamped with the current
    /// command's context and saga fields.
    #[must_use]
    pub fn make_event(&self, event_type: impl Into<String>, payload: Value) -> Event {
        let mut event = Event::new(event_type, payload)
            .for_aggregate(self.id.clone(), self.version)
            .with_timestamp(self.definition.clock.now());

        if let Some(command) = &self.command {
            event.context.clone_from(&command.context);
            event.saga_id.clone_from(&command.saga_id);
            event.saga_version = command.saga_version;
        }
        event
    }

    /// Apply a fully formed event and record it as a change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] when the event lacks an aggregate id or
    /// a type.
    pub fn emit_raw(&mut self, event: Event) -> Result<()> {
        if event.aggregate().is_none() {
            return Err(Error::InvalidEvent("event.aggregateId is required".into()));
        }
        if event.event_type.is_empty() {
            return Err(Error::InvalidEvent("event.type must be a non-empty string".into()));
        }

        self.mutate(&event)?;
        self.changes.push(Arc::new(event));
        Ok(())
    }

    /// Emit a snapshot event carrying the serialized state.
    ///
    /// # Errors
    ///
    /// Returns the state's serialization error.
    pub fn take_snapshot(&mut self) -> Result<()> {
        let payload = self.state.snapshot()?;
        self.emit(SNAPSHOT_EVENT_TYPE, payload)
    }
}

impl<S: AggregateState> fmt::Display for Aggregate<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (v{})", self.definition.name, self.id, self.version)
    }
}

impl<S: AggregateState + fmt::Debug> fmt::Debug for Aggregate<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("name", &self.definition.name)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("snapshot_version", &self.snapshot_version)
            .field("state", &self.state)
            .field("changes", &self.changes.len())
            .finish()
    }
}
