//! Message bus contract.
//!
//! Events fan out: every handler registered for an event type receives it.
//! Commands do not: a command type must have exactly one handler, and sending
//! a command returns whatever that handler produced.
//!
//! ```text
//! CommandBus ──send──► MessageBus ──► AggregateCommandHandler
//!                                            │ commit
//!                                            ▼
//! Projection ◄──publish── MessageBus ◄── EventStore
//! SagaEventHandler ◄─┘ (named queue)
//! ```
//!
//! A bus may additionally provide named queues. A queue delivers each event
//! to a single handler per event type, which is what sagas need to avoid
//! reacting twice to the same event.
//!
//! # Dyn Compatibility
//!
//! The trait returns boxed futures so buses can be shared as
//! `Arc<dyn MessageBus>`.

use crate::command::Command;
use crate::error::Result;
use crate::event::Event;
use crate::storage::BoxFuture;
use crate::stream::EventStream;
use std::future::Future;
use std::sync::Arc;

/// Handler invoked for every published event of a subscribed type.
pub type EventHandler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// The single handler of a command type.
pub type CommandHandler =
    Arc<dyn Fn(Command) -> BoxFuture<'static, Result<EventStream>> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`].
///
/// # Examples
///
/// ```
/// use eventide_core::bus::event_handler;
///
/// let handler = event_handler(|event| async move {
///     println!("{event}");
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn event_handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Wrap an async closure as a [`CommandHandler`].
pub fn command_handler<F, Fut>(f: F) -> CommandHandler
where
    F: Fn(Command) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<EventStream>> + Send + 'static,
{
    Arc::new(move |command| Box::pin(f(command)))
}

/// Transport for events and commands.
pub trait MessageBus: Send + Sync {
    /// Subscribe `handler` to events of `event_type`.
    ///
    /// # Errors
    ///
    /// Named queues return
    /// [`Error::DuplicateQueueHandler`](crate::Error::DuplicateQueueHandler)
    /// when the type already has a handler.
    fn on(&self, event_type: &str, handler: EventHandler) -> Result<()>;

    /// Register the handler of `command_type`.
    ///
    /// # Errors
    ///
    /// Implementations may refuse registration, for example on a transport
    /// that cannot receive commands.
    fn on_command(&self, command_type: &str, handler: CommandHandler) -> Result<()>;

    /// Deliver an event to every subscriber of its type.
    ///
    /// # Errors
    ///
    /// Returns the first subscriber or transport failure.
    fn publish(&self, event: Arc<Event>) -> BoxFuture<'_, Result<()>>;

    /// Deliver a command to its single handler and return what it produced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSubscribers`](crate::Error::NoSubscribers) or
    /// [`Error::MultipleSubscribers`](crate::Error::MultipleSubscribers) when
    /// the type does not have exactly one handler, or the handler's own error.
    fn send(&self, command: Command) -> BoxFuture<'_, Result<EventStream>>;

    /// A named single-consumer queue, if this bus supports them.
    fn queue(&self, _name: &str) -> Option<Arc<dyn MessageBus>> {
        None
    }
}
