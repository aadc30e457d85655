//! Event delivery to sagas.
//!
//! For every subscribed event the handler rebuilds the saga from its earlier
//! events, applies the new one, then drains the saga's command queue through
//! the command bus until it stays empty. The error hook may enqueue further
//! commands, which are picked up by the same drain.

use crate::command_bus::CommandBus;
use crate::event_store::EventStore;
use crate::metrics::SagaMetrics;
use crate::subscribe::subscribe;
use eventide_core::{Error, Event, Result, Saga, SagaDefinition, SagaState, event_handler};
use std::sync::Arc;

/// Subscribes a saga type to its events and runs them.
pub struct SagaEventHandler<S: SagaState> {
    event_store: EventStore,
    command_bus: CommandBus,
    definition: Arc<SagaDefinition<S>>,
}

impl<S: SagaState> Clone for SagaEventHandler<S> {
    fn clone(&self) -> Self {
        Self {
            event_store: self.event_store.clone(),
            command_bus: self.command_bus.clone(),
            definition: Arc::clone(&self.definition),
        }
    }
}

impl<S: SagaState> SagaEventHandler<S> {
    /// Create the handler and register the saga's starter types with the
    /// event store, which assigns saga ids to them on commit.
    #[must_use]
    pub fn new(
        definition: Arc<SagaDefinition<S>>,
        event_store: EventStore,
        command_bus: CommandBus,
    ) -> Self {
        event_store.register_saga_starters(definition.starters());
        Self {
            event_store,
            command_bus,
            definition,
        }
    }

    /// The saga definition.
    #[must_use]
    pub fn definition(&self) -> &SagaDefinition<S> {
        &self.definition
    }

    /// Subscribe [`handle`](Self::handle) to every starter and handled type,
    /// through the definition's named queue when it has one.
    ///
    /// The subscription does not keep the event store alive; events arriving
    /// after it is dropped fail with [`Error::StoreDropped`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueuesUnsupported`] when a queue is requested from a
    /// bus without queues, or the bus's registration error.
    pub fn subscribe(&self) -> Result<()> {
        let event_store = self.event_store.downgrade();
        let command_bus = self.command_bus.clone();
        let definition = Arc::clone(&self.definition);
        let handler = event_handler(move |event| {
            let attached = event_store.upgrade().map(|event_store| Self {
                event_store,
                command_bus: command_bus.clone(),
                definition: Arc::clone(&definition),
            });
            async move { attached?.handle(event).await }
        });

        subscribe(
            &self.event_store,
            &self.definition.message_types(),
            self.definition.queue_name(),
            &handler,
        )?;
        Ok(())
    }

    async fn restore_saga(&self, event: &Event) -> Result<Saga<S>> {
        let saga_id = event
            .saga()
            .cloned()
            .ok_or(Error::MissingArgument("event.sagaId"))?;

        let history = self.event_store.get_saga_events(&saga_id, event).await?;
        let saga = Saga::restore(Arc::clone(&self.definition), saga_id, &history).await?;
        tracing::debug!(saga = %saga, "Saga state restored");
        Ok(saga)
    }

    /// Apply `event` to its saga and send the resulting commands.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingArgument`] when the event carries no saga id
    /// - storage and handler failures
    /// - a failed command send, unless the error hook handles it
    #[tracing::instrument(
        skip(self, event),
        fields(saga = %self.definition.name(), event_type = %event.event_type)
    )]
    pub async fn handle(&self, event: Arc<Event>) -> Result<()> {
        let mut saga = self.restore_saga(&event).await?;
        saga.apply(&event).await?;
        SagaMetrics::record_event();

        loop {
            let commands = saga.take_uncommitted_messages();
            if commands.is_empty() {
                break;
            }
            tracing::debug!(saga = %saga, count = commands.len(), "Saga produced commands");

            for mut command in commands {
                if command.context.is_none() {
                    command.context.clone_from(&event.context);
                }

                match self.command_bus.send_raw(command.clone()).await {
                    Ok(_) => SagaMetrics::record_command(),
                    Err(error) => {
                        SagaMetrics::record_command_error();
                        let Some(on_error) = self.definition.error_hook() else {
                            return Err(error);
                        };
                        tracing::warn!(
                            saga = %saga,
                            command = %command,
                            error = %error,
                            "Saga command failed"
                        );
                        on_error(&mut saga, &error, &event, &command)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<S: SagaState> std::fmt::Debug for SagaEventHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaEventHandler")
            .field("saga", &self.definition.name())
            .field("queue", &self.definition.queue_name())
            .finish_non_exhaustive()
    }
}
