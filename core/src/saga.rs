//! Sagas: process managers reacting to events with commands.
//!
//! A saga instance is rebuilt for every incoming event by replaying the saga's
//! earlier events, then applies the new one. Handlers do not send commands
//! directly; they [`enqueue`](Saga::enqueue) them, and the saga event handler
//! drains the queue through the command bus afterwards.

use crate::command::{Command, CommandOptions};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::handlers::HandlerRegistry;
use crate::identifier::Identifier;
use crate::storage::BoxFuture;
use crate::stream::EventStream;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// State carried by a saga between events.
pub trait SagaState: Default + Send + Sync + 'static {}

impl<T: Default + Send + Sync + 'static> SagaState for T {}

/// Synchronous event handler.
pub type SyncSagaFn<S> = fn(&mut Saga<S>, &Event) -> Result<()>;

/// Asynchronous event handler.
pub type AsyncSagaFn<S> = for<'a> fn(&'a mut Saga<S>, &'a Event) -> BoxFuture<'a, Result<()>>;

/// Hook invoked when sending one of the saga's commands fails.
///
/// Receives the error, the event being handled and the failed command. The
/// hook may enqueue further commands; returning an error aborts the drain.
pub type SagaErrorFn<S> = fn(&mut Saga<S>, &Error, &Event, &Command) -> Result<()>;

/// A registered saga event handler.
pub enum SagaHandler<S: SagaState> {
    /// Runs to completion without suspending.
    Sync(SyncSagaFn<S>),
    /// Awaited before the saga version advances.
    Async(AsyncSagaFn<S>),
}

impl<S: SagaState> Clone for SagaHandler<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: SagaState> Copy for SagaHandler<S> {}

impl<S: SagaState> fmt::Debug for SagaHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => write!(f, "SagaHandler::Sync"),
            Self::Async(_) => write!(f, "SagaHandler::Async"),
        }
    }
}

/// Shared description of a saga type.
pub struct SagaDefinition<S: SagaState> {
    name: String,
    queue_name: Option<String>,
    starts_with: Vec<String>,
    handles: Vec<String>,
    handlers: HandlerRegistry<SagaHandler<S>>,
    on_error: Option<SagaErrorFn<S>>,
}

impl<S: SagaState> SagaDefinition<S> {
    /// Start describing a saga type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue_name: None,
            starts_with: Vec::new(),
            handles: Vec::new(),
            handlers: HandlerRegistry::new(),
            on_error: None,
        }
    }

    /// Event types that start a new saga instance.
    #[must_use]
    pub fn starts_with<I, T>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.starts_with = event_types.into_iter().map(Into::into).collect();
        self
    }

    /// Further event types handled by running instances.
    #[must_use]
    pub fn handles<I, T>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.handles = event_types.into_iter().map(Into::into).collect();
        self
    }

    /// Subscribe through the named bus queue instead of broadcast.
    #[must_use]
    pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    /// Register a synchronous event handler.
    #[must_use]
    pub fn on(mut self, event_type: impl Into<String>, handler: SyncSagaFn<S>) -> Self {
        self.handlers.insert(event_type, SagaHandler::Sync(handler));
        self
    }

    /// Register an asynchronous event handler.
    #[must_use]
    pub fn on_async(mut self, event_type: impl Into<String>, handler: AsyncSagaFn<S>) -> Self {
        self.handlers.insert(event_type, SagaHandler::Async(handler));
        self
    }

    /// Install a command-failure hook.
    #[must_use]
    pub fn on_error(mut self, hook: SagaErrorFn<S>) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Validate the declared types and freeze the definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingArgument`] when `starts_with` is empty, or
    /// [`Error::HandlerNotFound`] for a declared type without handler.
    pub fn build(self) -> Result<Arc<Self>> {
        if self.starts_with.is_empty() {
            return Err(Error::MissingArgument("startsWith"));
        }
        self.handlers.ensure_handles(&self.starts_with)?;
        self.handlers.ensure_handles(&self.handles)?;
        Ok(Arc::new(self))
    }

    /// Saga type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Named queue, if any.
    #[must_use]
    pub fn queue_name(&self) -> Option<&str> {
        self.queue_name.as_deref()
    }

    /// Starter event types.
    #[must_use]
    pub fn starters(&self) -> &[String] {
        &self.starts_with
    }

    /// Every subscribed event type, starters first, without duplicates.
    #[must_use]
    pub fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = Vec::new();
        for event_type in self.starts_with.iter().chain(&self.handles) {
            if !types.contains(event_type) {
                types.push(event_type.clone());
            }
        }
        types
    }

    /// The command-failure hook.
    #[must_use]
    pub const fn error_hook(&self) -> Option<SagaErrorFn<S>> {
        self.on_error
    }
}

impl<S: SagaState> fmt::Debug for SagaDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("name", &self.name)
            .field("queue_name", &self.queue_name)
            .field("starts_with", &self.starts_with)
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

/// One saga instance.
pub struct Saga<S: SagaState> {
    definition: Arc<SagaDefinition<S>>,
    id: Identifier,
    version: u64,
    state: S,
    messages: Vec<Command>,
}

impl<S: SagaState> Saga<S> {
    /// A fresh instance at version 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingArgument`] for an empty id.
    pub fn new(definition: Arc<SagaDefinition<S>>, id: Identifier) -> Result<Self> {
        if id.is_empty() {
            return Err(Error::MissingArgument("id"));
        }
        Ok(Self {
            definition,
            id,
            version: 0,
            state: S::default(),
            messages: Vec::new(),
        })
    }

    /// Rebuild an instance from its earlier events.
    ///
    /// Commands enqueued during replay were already sent when those events
    /// were first handled, so the queue is cleared afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first handler failure.
    pub async fn restore(
        definition: Arc<SagaDefinition<S>>,
        id: Identifier,
        events: &EventStream,
    ) -> Result<Self> {
        let mut saga = Self::new(definition, id)?;
        for event in events {
            saga.apply(event).await?;
        }
        saga.reset_uncommitted_messages();
        Ok(saga)
    }

    /// Saga id.
    #[must_use]
    pub const fn id(&self) -> &Identifier {
        &self.id
    }

    /// Number of events applied.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Mutable state, for handlers.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// The definition this instance was built from.
    #[must_use]
    pub fn definition(&self) -> &SagaDefinition<S> {
        &self.definition
    }

    /// Dispatch `event` to its handler, then advance the version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerNotFound`] for an unhandled type, or the
    /// handler's error; the version does not advance in either case.
    pub async fn apply(&mut self, event: &Event) -> Result<()> {
        let handler = *self.definition.handlers.require(&event.event_type)?;
        match handler {
            SagaHandler::Sync(handle) => handle(self, event)?,
            SagaHandler::Async(handle) => handle(self, event).await?,
        }
        self.version += 1;
        Ok(())
    }

    /// Queue a command stamped with this saga's id and version.
    pub fn enqueue(
        &mut self,
        command_type: impl Into<String>,
        aggregate_id: Option<Identifier>,
        payload: Value,
    ) {
        let options = CommandOptions {
            payload,
            context: None,
            saga: Some((self.id.clone(), self.version)),
        };
        self.messages
            .push(Command::from_options(command_type, aggregate_id, options));
    }

    /// Queue a fully formed command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCommand`] when the command has no type.
    pub fn enqueue_raw(&mut self, command: Command) -> Result<()> {
        command.validate()?;
        self.messages.push(command);
        Ok(())
    }

    /// Commands queued and not yet drained.
    #[must_use]
    pub fn uncommitted_messages(&self) -> &[Command] {
        &self.messages
    }

    /// Take every queued command, leaving the queue empty.
    pub fn take_uncommitted_messages(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.messages)
    }

    /// Clear the queue.
    pub fn reset_uncommitted_messages(&mut self) {
        self.messages.clear();
    }
}

impl<S: SagaState> fmt::Display for Saga<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (v{})", self.definition.name, self.id, self.version)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Seen(Vec<String>);

    fn on_created(saga: &mut Saga<Seen>, event: &Event) -> Result<()> {
        saga.state_mut().0.push(event.event_type.clone());
        saga.enqueue("doSomething", event.aggregate_id.clone(), event.payload.clone());
        saga.enqueue("doSomethingElse", event.aggregate_id.clone(), event.payload.clone());
        Ok(())
    }

    fn on_done<'a>(saga: &'a mut Saga<Seen>, event: &'a Event) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            saga.state_mut().0.push(event.event_type.clone());
            Ok(())
        })
    }

    fn definition() -> Arc<SagaDefinition<Seen>> {
        SagaDefinition::new("Workflow")
            .starts_with(["EventCreated"])
            .handles(["SomethingDone"])
            .on("EventCreated", on_created)
            .on_async("_SomethingDone", on_done)
            .build()
            .unwrap()
    }

    fn saga_event(event_type: &str, saga_version: u64) -> Event {
        Event::new(event_type, json!({ "body": "x" }))
            .for_aggregate(Identifier::new("a-1"), saga_version)
            .with_saga(Identifier::new("workflow-1"), saga_version)
    }

    #[tokio::test]
    async fn enqueue_stamps_saga_id_and_pre_apply_version() {
        let mut saga = Saga::new(definition(), Identifier::new("workflow-1")).unwrap();
        saga.apply(&saga_event("EventCreated", 0)).await.unwrap();

        let commands = saga.uncommitted_messages();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].command_type, "doSomething");
        assert_eq!(commands[1].command_type, "doSomethingElse");
        assert!(commands.iter().all(|c| c.saga_id == Some(Identifier::new("workflow-1"))));
        assert!(commands.iter().all(|c| c.saga_version == Some(0)));
        assert_eq!(saga.version(), 1);
    }

    #[tokio::test]
    async fn restore_replays_and_clears_queue() {
        let history = EventStream::from(vec![
            saga_event("EventCreated", 0),
            saga_event("SomethingDone", 1),
        ]);
        let saga = Saga::restore(definition(), Identifier::new("workflow-1"), &history)
            .await
            .unwrap();

        assert_eq!(saga.version(), 2);
        assert!(saga.uncommitted_messages().is_empty());
        assert_eq!(saga.state().0, vec!["EventCreated", "SomethingDone"]);
        assert_eq!(saga.to_string(), "Workflow workflow-1 (v2)");
    }

    #[tokio::test]
    async fn failed_apply_keeps_version() {
        let mut saga = Saga::new(definition(), Identifier::new("workflow-1")).unwrap();
        let result = saga.apply(&saga_event("Unrelated", 0)).await;

        assert!(matches!(result, Err(Error::HandlerNotFound { .. })));
        assert_eq!(saga.version(), 0);
    }

    #[test]
    fn build_requires_starters_with_handlers() {
        let missing = SagaDefinition::<Seen>::new("Workflow").build();
        assert_eq!(missing.err(), Some(Error::MissingArgument("startsWith")));

        let unhandled = SagaDefinition::<Seen>::new("Workflow")
            .starts_with(["EventCreated"])
            .build();
        assert!(matches!(unhandled, Err(Error::HandlerNotFound { .. })));
    }

    #[test]
    fn message_types_are_unique_and_ordered() {
        let definition = SagaDefinition::<Seen>::new("Workflow")
            .starts_with(["EventCreated"])
            .handles(["SomethingDone", "EventCreated"])
            .on("EventCreated", on_created)
            .on_async("SomethingDone", on_done)
            .build()
            .unwrap();
        assert_eq!(definition.message_types(), vec!["EventCreated", "SomethingDone"]);
    }

    #[test]
    fn enqueue_raw_rejects_untyped_command() {
        let mut saga = Saga::new(definition(), Identifier::new("workflow-1")).unwrap();
        assert!(saga.enqueue_raw(Command::new("")).is_err());
        assert!(saga.enqueue_raw(Command::new("notify")).is_ok());
        assert_eq!(saga.take_uncommitted_messages().len(), 1);
        assert!(saga.uncommitted_messages().is_empty());
    }
}
