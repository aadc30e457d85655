//! Command routing.

use crate::in_memory_bus::InMemoryMessageBus;
use crate::metrics::CommandMetrics;
use eventide_core::{
    Command, CommandHandler, CommandOptions, EventStream, Identifier, MessageBus, Result,
};
use std::sync::Arc;
use std::time::Instant;

/// Sends commands to their single handler over a [`MessageBus`].
#[derive(Clone)]
pub struct CommandBus {
    bus: Arc<dyn MessageBus>,
}

impl CommandBus {
    /// Route commands over `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Route commands over a fresh [`InMemoryMessageBus`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryMessageBus::new()))
    }

    /// The underlying bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Register the handler of `command_type`.
    ///
    /// # Errors
    ///
    /// Propagates the bus's registration error.
    pub fn on(&self, command_type: &str, handler: CommandHandler) -> Result<()> {
        self.bus.on_command(command_type, handler)
    }

    /// Build and send a command.
    ///
    /// # Errors
    ///
    /// See [`send_raw`](Self::send_raw).
    pub async fn send(
        &self,
        command_type: &str,
        aggregate_id: Option<Identifier>,
        options: CommandOptions,
    ) -> Result<EventStream> {
        self.send_raw(Command::from_options(command_type, aggregate_id, options))
            .await
    }

    /// Send a fully formed command and return the events it produced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCommand`](eventide_core::Error::InvalidCommand)
    /// for an untyped command, routing errors from the bus, or the handler's
    /// error.
    pub async fn send_raw(&self, command: Command) -> Result<EventStream> {
        command.validate()?;
        let command_type = command.command_type.clone();
        tracing::debug!(command_type = %command_type, "Sending command");

        let started = Instant::now();
        match self.bus.send(command).await {
            Ok(events) => {
                tracing::debug!(
                    command_type = %command_type,
                    events = events.len(),
                    "Command processed"
                );
                CommandMetrics::record_processed(&command_type, started.elapsed());
                Ok(events)
            }
            Err(error) => {
                tracing::info!(
                    command_type = %command_type,
                    error = %error,
                    "Command processing has failed"
                );
                CommandMetrics::record_failure(&command_type);
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBus").finish_non_exhaustive()
    }
}
