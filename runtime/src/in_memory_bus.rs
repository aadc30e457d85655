//! In-process [`MessageBus`].
//!
//! - events fan out to every handler of their type, then to every named queue
//! - commands go to exactly one handler
//! - a named queue accepts at most one handler per event type

use eventide_core::{
    BoxFuture, Command, CommandHandler, Error, Event, EventHandler, EventStream, MessageBus, Result,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Message bus living in the current process.
///
/// Used by [`CommandBus::in_memory`](crate::CommandBus::in_memory) and by
/// tests. Handlers run on the publishing task; nothing is persisted.
#[derive(Default)]
pub struct InMemoryMessageBus {
    name: Option<String>,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    command_handlers: RwLock<HashMap<String, Vec<CommandHandler>>>,
    queues: RwLock<HashMap<String, Arc<InMemoryMessageBus>>>,
}

impl InMemoryMessageBus {
    /// A broadcast bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn named_queue(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Queue name, `None` for the broadcast bus.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Number of event handlers registered for `event_type` on this bus
    /// (queues excluded).
    #[must_use]
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    fn handlers_for(&self, event_type: &str) -> Vec<EventHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    fn queues(&self) -> Vec<Arc<Self>> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl MessageBus for InMemoryMessageBus {
    fn on(&self, event_type: &str, handler: EventHandler) -> Result<()> {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let registered = handlers.entry(event_type.to_string()).or_default();

        if let Some(queue) = &self.name {
            if !registered.is_empty() {
                return Err(Error::DuplicateQueueHandler {
                    queue: queue.clone(),
                    message_type: event_type.to_string(),
                });
            }
        }
        registered.push(handler);
        Ok(())
    }

    fn on_command(&self, command_type: &str, handler: CommandHandler) -> Result<()> {
        self.command_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(command_type.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    fn publish(&self, event: Arc<Event>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let deliveries = self
                .handlers_for(&event.event_type)
                .into_iter()
                .map(|handler| handler(Arc::clone(&event)));
            let mut results = join_all(deliveries).await;

            for queue in self.queues() {
                results.push(queue.publish(Arc::clone(&event)).await);
            }

            results.into_iter().collect()
        })
    }

    fn send(&self, command: Command) -> BoxFuture<'_, Result<EventStream>> {
        Box::pin(async move {
            let handler = {
                let handlers = self
                    .command_handlers
                    .read()
                    .unwrap_or_else(PoisonError::into_inner);
                match handlers.get(&command.command_type).map(Vec::as_slice) {
                    None | Some([]) => {
                        return Err(Error::NoSubscribers(command.command_type.clone()));
                    }
                    Some([handler]) => Arc::clone(handler),
                    Some(_) => {
                        return Err(Error::MultipleSubscribers(command.command_type.clone()));
                    }
                }
            };
            handler(command).await
        })
    }

    fn queue(&self, name: &str) -> Option<Arc<dyn MessageBus>> {
        if self.name.is_some() {
            return None;
        }
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        let queue = queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Self::named_queue(name)));
        Some(Arc::clone(queue) as Arc<dyn MessageBus>)
    }
}

impl std::fmt::Debug for InMemoryMessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMessageBus")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
