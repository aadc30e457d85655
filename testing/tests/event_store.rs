//! Event store contract checks, saga id assignment and publishing.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use eventide_core::{
    BoxFuture, Command, CommandHandler, Error, Event, EventFilter, EventHandler, EventStorage,
    EventStream, Identifier, MessageBus, Result, SNAPSHOT_EVENT_TYPE, SnapshotStorage,
    event_handler,
};
use eventide_runtime::{EventStore, EventStoreConfig, PublishMode, subscribe};
use eventide_testing::{InMemoryEventStorage, InMemoryMessageBus, InMemorySnapshotStorage};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn event(event_type: &str, aggregate: &str, version: u64) -> Event {
    Event::new(event_type, json!({})).for_aggregate(Identifier::new(aggregate), version)
}

fn snapshot(aggregate: &str, version: u64) -> Event {
    Event::new(SNAPSHOT_EVENT_TYPE, json!({ "body": "x" }))
        .for_aggregate(Identifier::new(aggregate), version)
}

struct Fixture {
    store: EventStore,
    storage: InMemoryEventStorage,
    snapshots: InMemorySnapshotStorage,
}

fn fixture(mode: PublishMode, with_snapshots: bool) -> Fixture {
    let storage = InMemoryEventStorage::new();
    let snapshots = InMemorySnapshotStorage::new();
    let store = EventStore::with_config(
        Arc::new(storage.clone()),
        with_snapshots.then(|| Arc::new(snapshots.clone()) as Arc<dyn SnapshotStorage>),
        Arc::new(InMemoryMessageBus::new()),
        EventStoreConfig::default().with_publish_mode(mode),
    );
    Fixture {
        store,
        storage,
        snapshots,
    }
}

fn recorder(seen: &Arc<Mutex<Vec<String>>>) -> EventHandler {
    let seen = Arc::clone(seen);
    event_handler(move |event| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().unwrap().push(event.event_type.clone());
            Ok(())
        }
    })
}

fn failing() -> EventHandler {
    event_handler(|_event| async { Err(Error::Transport("subscriber down".to_string())) })
}

#[tokio::test]
async fn snapshot_is_stored_apart_from_events() {
    let f = fixture(PublishMode::Synchronous, true);
    let seen = Arc::new(Mutex::new(Vec::new()));
    f.store.on(SNAPSHOT_EVENT_TYPE, recorder(&seen)).unwrap();
    f.store.on("Changed", recorder(&seen)).unwrap();

    let committed = f
        .store
        .commit(EventStream::from(vec![event("Changed", "a-1", 0), snapshot("a-1", 1)]))
        .await
        .unwrap();

    assert_eq!(committed.event_types(), vec!["Changed"]);
    assert_eq!(f.storage.len(), 1);
    assert_eq!(f.snapshots.len(), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["Changed"]);
}

#[tokio::test]
async fn more_than_one_snapshot_is_refused_before_storage() {
    let f = fixture(PublishMode::Synchronous, true);

    let result = f
        .store
        .commit(EventStream::from(vec![snapshot("a-1", 0), snapshot("a-1", 1)]))
        .await;

    assert_eq!(result, Err(Error::MultipleSnapshots));
    assert_eq!(f.storage.commit_calls(), 0);
    assert!(f.snapshots.is_empty());
}

#[tokio::test]
async fn snapshot_without_snapshot_storage_is_refused() {
    let f = fixture(PublishMode::Synchronous, false);
    assert!(!f.store.snapshots_supported());

    let result = f
        .store
        .commit(EventStream::from(vec![event("Changed", "a-1", 0), snapshot("a-1", 1)]))
        .await;

    assert_eq!(result, Err(Error::SnapshotsUnsupported));
    assert_eq!(f.storage.commit_calls(), 0);
}

#[tokio::test]
async fn invalid_events_never_reach_storage() {
    let f = fixture(PublishMode::Synchronous, false);

    let orphan = Event::new("Orphaned", Value::Null);
    let result = f
        .store
        .commit(EventStream::from(vec![event("Changed", "a-1", 0), orphan]))
        .await;

    assert!(matches!(result, Err(Error::InvalidEvent(_))));
    assert_eq!(f.storage.commit_calls(), 0);

    let unversioned = Event {
        saga_id: Some(Identifier::new("s-1")),
        ..Event::new("Stepped", Value::Null)
    };
    let result = f.store.commit(EventStream::from(vec![unversioned])).await;
    assert!(matches!(result, Err(Error::InvalidEvent(_))));
}

#[tokio::test]
async fn custom_validator_replaces_the_default() {
    let storage = InMemoryEventStorage::new();
    let store = EventStore::with_config(
        Arc::new(storage.clone()),
        None,
        Arc::new(InMemoryMessageBus::new()),
        EventStoreConfig::default()
            .with_publish_mode(PublishMode::Synchronous)
            .with_validator(Arc::new(|event: &Event| {
                if event.payload.is_null() {
                    return Err(Error::InvalidEvent("payload is required".to_string()));
                }
                Ok(())
            })),
    );

    let result = store
        .commit(EventStream::from(vec![Event::new("Changed", Value::Null)]))
        .await;
    assert_eq!(result, Err(Error::InvalidEvent("payload is required".to_string())));

    store
        .commit(EventStream::from(vec![Event::new("Changed", json!({ "free": "form" }))]))
        .await
        .unwrap();
    assert_eq!(storage.len(), 1);
}

#[tokio::test]
async fn starters_get_a_fresh_saga_id() {
    let f = fixture(PublishMode::Synchronous, false);
    f.store.register_saga_starters(&["Started", "Started", "Restarted"]);
    f.store.register_saga_starters(&["Restarted"]);
    assert_eq!(f.store.saga_starters(), vec!["Started", "Restarted"]);

    let committed = f
        .store
        .commit(EventStream::from(vec![
            event("Started", "a-1", 0),
            event("Changed", "a-1", 1),
            event("Started", "a-2", 0),
        ]))
        .await
        .unwrap();

    let first = committed[0].saga_id.clone().unwrap();
    let second = committed[2].saga_id.clone().unwrap();
    assert_ne!(first, second);
    assert_eq!(committed[0].saga_version, Some(0));
    assert_eq!(committed[1].saga_id, None);

    let stored = f.storage.events();
    assert_eq!(stored[0].saga_id, Some(first));
}

#[tokio::test]
async fn read_arguments_are_checked() {
    let f = fixture(PublishMode::Synchronous, false);

    assert_eq!(
        f.store.get_aggregate_events(&Identifier::new("")).await,
        Err(Error::MissingArgument("aggregateId"))
    );

    let unversioned = event("Changed", "a-1", 0);
    assert_eq!(
        f.store.get_saga_events(&Identifier::new("s-1"), &unversioned).await,
        Err(Error::MissingArgument("beforeEvent.sagaVersion"))
    );

    let versioned = unversioned.with_saga(Identifier::new("s-1"), 1);
    assert_eq!(
        f.store.get_saga_events(&Identifier::new(""), &versioned).await,
        Err(Error::MissingArgument("sagaId"))
    );
}

#[tokio::test]
async fn saga_history_precedes_the_given_event() {
    let f = fixture(PublishMode::Synchronous, false);
    let saga = Identifier::new("s-1");
    let history: EventStream = (0..4)
        .map(|v| event("Stepped", "a-1", v).with_saga(saga.clone(), v))
        .collect();
    f.store.save(history.clone()).await.unwrap();

    let events = f.store.get_saga_events(&saga, &history[2]).await.unwrap();
    assert_eq!(events.map(|e| e.saga_version), vec![Some(0), Some(1)]);
}

#[tokio::test]
async fn all_events_filter_by_type_and_aggregate() {
    let f = fixture(PublishMode::Synchronous, false);
    f.store
        .save(EventStream::from(vec![
            event("Created", "a-1", 0),
            event("Changed", "a-1", 1),
            event("Created", "a-2", 0),
        ]))
        .await
        .unwrap();

    let types = vec!["Created".to_string()];
    let created = f.store.get_all_events(Some(types.as_slice()), None).await.unwrap();
    assert_eq!(created.len(), 2);

    let own = EventFilter::aggregate(Identifier::new("a-1"));
    let history = f.store.get_all_events(None, Some(&own)).await.unwrap();
    assert_eq!(history.event_types(), vec!["Created", "Changed"]);

    assert_eq!(f.store.get_all_events(None, None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn synchronous_publish_propagates_subscriber_failures() {
    let f = fixture(PublishMode::Synchronous, false);
    f.store.on("Changed", failing()).unwrap();

    let result = f.store.commit(EventStream::from(vec![event("Changed", "a-1", 0)])).await;

    assert_eq!(result, Err(Error::Transport("subscriber down".to_string())));
    assert_eq!(f.storage.len(), 1);
}

#[tokio::test]
async fn deferred_publish_reports_failures_on_the_channel() {
    let f = fixture(PublishMode::Deferred, false);
    f.store.on("Changed", failing()).unwrap();
    let mut failures = f.store.publish_failures();

    let committed = f
        .store
        .commit(EventStream::from(vec![event("Changed", "a-1", 0)]))
        .await
        .unwrap();
    assert_eq!(committed.len(), 1);

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.event.event_type, "Changed");
    assert_eq!(failure.error, Error::Transport("subscriber down".to_string()));
}

#[tokio::test]
async fn deferred_publish_keeps_commit_order() {
    let f = fixture(PublishMode::Deferred, false);
    let seen = Arc::new(Mutex::new(Vec::new()));
    for event_type in ["First", "Second", "Third"] {
        f.store.on(event_type, recorder(&seen)).unwrap();
    }

    let last = f.store.once(&["Third"]);
    f.store
        .commit(EventStream::from(vec![event("First", "a-1", 0), event("Second", "a-1", 1)]))
        .await
        .unwrap();
    f.store
        .commit(EventStream::from(vec![event("Third", "a-1", 2)]))
        .await
        .unwrap();
    last.await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["First", "Second", "Third"]);
}

#[tokio::test]
async fn once_resolves_with_the_first_matching_type() {
    let f = fixture(PublishMode::Synchronous, false);

    let next = f.store.once(&["Changed", "Deleted"]);
    f.store
        .commit(EventStream::from(vec![event("Created", "a-1", 0), event("Deleted", "a-1", 1)]))
        .await
        .unwrap();

    assert_eq!(next.await.unwrap().event_type, "Deleted");
}

/// A bus delegating to [`InMemoryMessageBus`] without exposing its queues.
#[derive(Default)]
struct BroadcastOnly(InMemoryMessageBus);

impl MessageBus for BroadcastOnly {
    fn on(&self, event_type: &str, handler: EventHandler) -> Result<()> {
        self.0.on(event_type, handler)
    }

    fn on_command(&self, command_type: &str, handler: CommandHandler) -> Result<()> {
        self.0.on_command(command_type, handler)
    }

    fn publish(&self, event: Arc<Event>) -> BoxFuture<'_, Result<()>> {
        self.0.publish(event)
    }

    fn send(&self, command: Command) -> BoxFuture<'_, Result<EventStream>> {
        self.0.send(command)
    }
}

#[tokio::test]
async fn queues_need_bus_support() {
    let store = EventStore::new(
        Arc::new(InMemoryEventStorage::new()),
        Arc::new(BroadcastOnly::default()),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));

    assert!(matches!(store.queue("sagas"), Err(Error::QueuesUnsupported)));
    assert_eq!(
        subscribe(&store, &["Changed"], Some("sagas"), &recorder(&seen)),
        Err(Error::QueuesUnsupported)
    );
    assert_eq!(
        subscribe(&store, &["Changed", "Changed"], None, &recorder(&seen)),
        Ok(vec!["Changed".to_string()])
    );
}

#[tokio::test]
async fn new_ids_come_from_storage() {
    let f = fixture(PublishMode::Deferred, false);
    let a = f.store.get_new_id().await.unwrap();
    let b = f.store.get_new_id().await.unwrap();
    assert_ne!(a, b);
    assert_eq!(f.store.publish_mode(), PublishMode::Deferred);
}

/// In-memory storage that counts id requests.
struct CountingIds {
    events: InMemoryEventStorage,
    id_requests: AtomicUsize,
}

impl CountingIds {
    fn new() -> Self {
        Self {
            events: InMemoryEventStorage::new(),
            id_requests: AtomicUsize::new(0),
        }
    }

    fn id_requests(&self) -> usize {
        self.id_requests.load(Ordering::SeqCst)
    }
}

impl EventStorage for CountingIds {
    fn commit_events(&self, events: EventStream) -> BoxFuture<'_, Result<()>> {
        self.events.commit_events(events)
    }

    fn get_events<'a>(
        &'a self,
        event_types: Option<&'a [String]>,
        filter: &'a EventFilter,
    ) -> BoxFuture<'a, Result<EventStream>> {
        self.events.get_events(event_types, filter)
    }

    fn get_aggregate_events<'a>(
        &'a self,
        aggregate_id: &'a Identifier,
        snapshot: Option<&'a Event>,
    ) -> BoxFuture<'a, Result<EventStream>> {
        self.events.get_aggregate_events(aggregate_id, snapshot)
    }

    fn get_saga_events<'a>(
        &'a self,
        saga_id: &'a Identifier,
        before_event: &'a Event,
    ) -> BoxFuture<'a, Result<EventStream>> {
        self.events.get_saga_events(saga_id, before_event)
    }

    fn get_new_id(&self) -> BoxFuture<'_, Result<Identifier>> {
        self.id_requests.fetch_add(1, Ordering::SeqCst);
        self.events.get_new_id()
    }
}

#[tokio::test]
async fn rejected_batches_draw_no_saga_id() {
    let storage = Arc::new(CountingIds::new());
    let store = EventStore::with_config(
        Arc::clone(&storage) as Arc<dyn EventStorage>,
        None,
        Arc::new(InMemoryMessageBus::new()),
        EventStoreConfig::default().with_publish_mode(PublishMode::Synchronous),
    );
    store.register_saga_starters(&["Started"]);

    let orphan = Event::new("Orphan", json!({}));
    let result = store
        .commit(EventStream::from(vec![event("Started", "a-1", 0), orphan]))
        .await;
    assert!(matches!(result, Err(Error::InvalidEvent(_))));

    let result = store
        .commit(EventStream::from(vec![event("Started", "a-2", 0), snapshot("a-2", 1)]))
        .await;
    assert_eq!(result, Err(Error::SnapshotsUnsupported));

    assert_eq!(storage.id_requests(), 0);
    assert_eq!(storage.events.commit_calls(), 0);
}

#[tokio::test]
async fn starters_are_validated_as_saga_events() {
    let storage = Arc::new(CountingIds::new());
    let store = EventStore::with_config(
        Arc::clone(&storage) as Arc<dyn EventStorage>,
        None,
        Arc::new(InMemoryMessageBus::new()),
        EventStoreConfig::default().with_publish_mode(PublishMode::Synchronous),
    );
    store.register_saga_starters(&["Started"]);

    let committed = store
        .commit(EventStream::from(vec![Event::new("Started", json!({}))]))
        .await
        .unwrap();

    assert!(committed[0].saga().is_some());
    assert_eq!(committed[0].saga_version, Some(0));
    assert_eq!(storage.id_requests(), 1);
}
