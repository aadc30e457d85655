//! Observer plumbing shared by sagas and projections.

use crate::event_store::EventStore;
use eventide_core::{EventHandler, MessageBus, Result};
use std::sync::Arc;

/// Register one master `handler` for each distinct type in `event_types`.
///
/// With a `queue_name` the handler is registered on that named queue of the
/// store's bus, so each event reaches a single consumer; otherwise it joins
/// the broadcast.
///
/// Returns the types actually subscribed, duplicates removed, in first-seen
/// order.
///
/// # Errors
///
/// Returns [`Error::QueuesUnsupported`](eventide_core::Error::QueuesUnsupported)
/// for a queue on a bus without queues, or the bus's registration error.
pub fn subscribe<S: AsRef<str>>(
    event_store: &EventStore,
    event_types: &[S],
    queue_name: Option<&str>,
    handler: &EventHandler,
) -> Result<Vec<String>> {
    let queue: Option<Arc<dyn MessageBus>> =
        queue_name.map(|name| event_store.queue(name)).transpose()?;

    let mut subscribed: Vec<String> = Vec::with_capacity(event_types.len());
    for event_type in event_types {
        let event_type = event_type.as_ref();
        if subscribed.iter().any(|known| known == event_type) {
            continue;
        }

        match &queue {
            Some(queue) => queue.on(event_type, Arc::clone(handler))?,
            None => event_store.on(event_type, Arc::clone(handler))?,
        }
        subscribed.push(event_type.to_string());
    }

    tracing::debug!(types = ?subscribed, queue = queue_name, "Subscribed");
    Ok(subscribed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{EventStoreConfig, PublishMode};
    use crate::in_memory_bus::InMemoryMessageBus;
    use eventide_core::{
        BoxFuture, Error, Event, EventFilter, EventStorage, EventStream, Identifier, event_handler,
    };
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoStorage;

    impl EventStorage for NoStorage {
        fn commit_events(&self, _events: EventStream) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn get_events<'a>(
            &'a self,
            _event_types: Option<&'a [String]>,
            _filter: &'a EventFilter,
        ) -> BoxFuture<'a, Result<EventStream>> {
            Box::pin(async { Ok(EventStream::empty()) })
        }

        fn get_aggregate_events<'a>(
            &'a self,
            _aggregate_id: &'a Identifier,
            _snapshot: Option<&'a Event>,
        ) -> BoxFuture<'a, Result<EventStream>> {
            Box::pin(async { Ok(EventStream::empty()) })
        }

        fn get_saga_events<'a>(
            &'a self,
            _saga_id: &'a Identifier,
            _before_event: &'a Event,
        ) -> BoxFuture<'a, Result<EventStream>> {
            Box::pin(async { Ok(EventStream::empty()) })
        }

        fn get_new_id(&self) -> BoxFuture<'_, Result<Identifier>> {
            Box::pin(async { Ok(Identifier::new("1")) })
        }
    }

    fn store(bus: Arc<InMemoryMessageBus>) -> EventStore {
        let config = EventStoreConfig::default().with_publish_mode(PublishMode::Synchronous);
        EventStore::with_config(Arc::new(NoStorage), None, bus, config)
    }

    #[tokio::test]
    async fn duplicates_are_subscribed_once() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let store = store(Arc::clone(&bus));
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            event_handler(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let types = subscribe(&store, &["A", "B", "A"], None, &handler).unwrap();
        assert_eq!(types, vec!["A", "B"]);
        assert_eq!(bus.handler_count("A"), 1);

        let event = Event::new("A", Value::Null).for_aggregate(Identifier::new("x"), 0);
        store.publish(EventStream::from(vec![event])).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queue_subscription_stays_off_the_broadcast() {
        let bus = Arc::new(InMemoryMessageBus::new());
        let store = store(Arc::clone(&bus));
        let handler = event_handler(|_| async { Ok(()) });

        subscribe(&store, &["A"], Some("sagas"), &handler).unwrap();
        assert_eq!(bus.handler_count("A"), 0);

        let again = subscribe(&store, &["A"], Some("sagas"), &handler);
        assert!(matches!(again, Err(Error::DuplicateQueueHandler { .. })));
    }
}
