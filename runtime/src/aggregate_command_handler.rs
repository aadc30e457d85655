//! Command execution against event-sourced aggregates.
//!
//! ```text
//! Command ─► restore (or create) aggregate ─► handle ─► changes
//!                                                          │ + snapshot?
//!                                                          ▼
//!                                                  EventStore::commit
//! ```

use crate::command_bus::CommandBus;
use crate::event_store::EventStore;
use eventide_core::{
    Aggregate, AggregateDefinition, AggregateFactory, AggregateOptions, AggregateState, Command,
    EventStream, Result, command_handler,
};
use std::sync::Arc;

/// Subscribes an aggregate type to its commands and executes them.
pub struct AggregateCommandHandler<S: AggregateState> {
    event_store: EventStore,
    definition: Arc<AggregateDefinition<S>>,
    factory: AggregateFactory<S>,
    handles: Vec<String>,
}

impl<S: AggregateState> Clone for AggregateCommandHandler<S> {
    fn clone(&self) -> Self {
        Self {
            event_store: self.event_store.clone(),
            definition: Arc::clone(&self.definition),
            factory: Arc::clone(&self.factory),
            handles: self.handles.clone(),
        }
    }
}

impl<S: AggregateState> AggregateCommandHandler<S> {
    /// Handle the definition's command types with its default factory.
    #[must_use]
    pub fn new(event_store: EventStore, definition: Arc<AggregateDefinition<S>>) -> Self {
        let factory = definition.factory();
        Self::with_factory(event_store, definition, factory)
    }

    /// Handle the definition's command types, building instances with
    /// `factory`.
    #[must_use]
    pub fn with_factory(
        event_store: EventStore,
        definition: Arc<AggregateDefinition<S>>,
        factory: AggregateFactory<S>,
    ) -> Self {
        let handles = definition.handles();
        Self {
            event_store,
            definition,
            factory,
            handles,
        }
    }

    /// Command types this handler subscribes to.
    #[must_use]
    pub fn handles(&self) -> &[String] {
        &self.handles
    }

    /// Register [`execute`](Self::execute) for every handled command type.
    ///
    /// The registered handlers do not keep the event store alive; commands
    /// arriving after it is dropped fail with
    /// [`Error::StoreDropped`](eventide_core::Error::StoreDropped).
    ///
    /// # Errors
    ///
    /// Propagates the bus's registration error.
    pub fn subscribe(&self, command_bus: &CommandBus) -> Result<()> {
        for command_type in &self.handles {
            let event_store = self.event_store.downgrade();
            let definition = Arc::clone(&self.definition);
            let factory = Arc::clone(&self.factory);
            let handles = self.handles.clone();
            command_bus.on(
                command_type,
                command_handler(move |command| {
                    let attached = event_store.upgrade().map(|event_store| Self {
                        event_store,
                        definition: Arc::clone(&definition),
                        factory: Arc::clone(&factory),
                        handles: handles.clone(),
                    });
                    async move { attached?.execute(command).await }
                }),
            )?;
        }
        Ok(())
    }

    async fn restore_aggregate(&self, command: &Command) -> Result<Aggregate<S>> {
        match command.aggregate() {
            Some(id) => {
                let events = self.event_store.get_aggregate_events(id).await?;
                let options = AggregateOptions::new(id.clone()).with_events(events);
                let aggregate = (self.factory)(options)?;
                tracing::debug!(aggregate = %aggregate, "Aggregate state restored");
                Ok(aggregate)
            }
            None => {
                let raw = self.event_store.get_new_id().await?;
                let id = self.definition.assign_id(raw);
                let aggregate = (self.factory)(AggregateOptions::new(id))?;
                tracing::debug!(aggregate = %aggregate, "Aggregate created");
                Ok(aggregate)
            }
        }
    }

    /// Run one command and commit what it produced.
    ///
    /// Returns the committed events (snapshot excluded). A command producing
    /// no events returns an empty stream without touching storage.
    ///
    /// # Errors
    ///
    /// Storage failures, the handler's error, or commit failures. Nothing is
    /// persisted when the handler fails.
    #[tracing::instrument(
        skip(self, command),
        fields(aggregate = %self.definition.name(), command_type = %command.command_type)
    )]
    pub async fn execute(&self, command: Command) -> Result<EventStream> {
        let mut aggregate = self.restore_aggregate(&command).await?;
        aggregate.handle(&command).await?;

        let mut changes = aggregate.changes();
        if changes.is_empty() {
            tracing::debug!(aggregate = %aggregate, "Command produced no events");
            return Ok(changes);
        }

        if self.event_store.snapshots_supported() && aggregate.should_take_snapshot() {
            aggregate.take_snapshot()?;
            changes = aggregate.changes();
        }

        let committed = self.event_store.commit(changes).await?;
        tracing::info!(aggregate = %aggregate, events = committed.len(), "Command processed");
        Ok(committed)
    }
}

impl<S: AggregateState> std::fmt::Debug for AggregateCommandHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateCommandHandler")
            .field("aggregate", &self.definition.name())
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}
