//! Aggregate snapshots: creation cadence, content and restore fast-forward.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use eventide_core::{
    Aggregate, AggregateOptions, CommandOptions, Event, EventStream, Identifier,
    SNAPSHOT_EVENT_TYPE,
};
use eventide_runtime::EventStore;
use eventide_testing::domain::post_definition;
use eventide_testing::properties::post_history;
use eventide_testing::{
    InMemoryEventStorage, InMemoryMessageBus, InMemorySnapshotStorage, TestDomain,
};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

/// Create a post, change it once, then 20 more times, waiting for the view
/// after every command.
async fn write_history(domain: &TestDomain) -> Identifier {
    let projected = domain.view().once("EventCreated");
    let created = domain
        .command_bus
        .send(
            "createEvent",
            None,
            CommandOptions::payload(json!({ "body": "Lorem Ipsum" }))
                .with_context(json!({ "reqId": 1234 })),
        )
        .await
        .unwrap();
    projected.await.unwrap();
    let id = created[0].aggregate_id.clone().unwrap();

    let mut bodies = vec!["Baba Luga".to_string()];
    bodies.extend((0..20).map(|index| format!("Baba Luga ({index})")));

    for body in bodies {
        let projected = domain.view().once("EventChanged");
        domain
            .command_bus
            .send(
                "changeEvent",
                Some(id.clone()),
                CommandOptions::payload(json!({ "body": body }))
                    .with_context(json!({ "reqId": 5678 })),
            )
            .await
            .unwrap();
        projected.await.unwrap();
    }

    id
}

#[tokio::test]
async fn snapshots_are_taken_every_ten_versions() {
    let domain = TestDomain::new().await.unwrap();
    let id = write_history(&domain).await;

    let snapshots = domain.snapshots.as_ref().unwrap().for_aggregate(&id);
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].aggregate_version, 11);
    assert_eq!(snapshots[0].payload, json!({ "body": "Baba Luga (8)" }));

    let latest = snapshots.last().unwrap();
    assert_eq!(latest.event_type, SNAPSHOT_EVENT_TYPE);
    assert_eq!(latest.aggregate_version, 22);
    assert_eq!(latest.aggregate_id, Some(id.clone()));
    assert_eq!(latest.payload, json!({ "body": "Baba Luga (18)" }));
    assert_eq!(latest.context, Some(json!({ "reqId": 5678 })));

    // Snapshots take a version slot but never reach the event log.
    let versions = domain.storage.events().map(|e| e.aggregate_version);
    assert_eq!(versions.len(), 22);
    assert!(!versions.contains(&11));
    assert!(!versions.contains(&22));
    assert!(domain.storage.events().iter().all(|e| !e.is_snapshot()));

    let record = domain.view().get(&id).await.unwrap().unwrap();
    assert_eq!(record.body, "Baba Luga (19)");
}

#[tokio::test]
async fn same_results_without_snapshots() {
    let domain = TestDomain::builder().without_snapshots().build().await.unwrap();
    let id = write_history(&domain).await;

    assert!(domain.snapshots.is_none());
    assert_eq!(domain.storage.len(), 22);
    let versions = domain.storage.events().map(|e| e.aggregate_version);
    assert_eq!(versions, (0..22).collect::<Vec<u64>>());

    let record = domain.view().get(&id).await.unwrap().unwrap();
    assert_eq!(record.body, "Baba Luga (19)");
}

#[tokio::test]
async fn restored_aggregate_continues_after_the_snapshot() {
    let domain = TestDomain::new().await.unwrap();
    let id = write_history(&domain).await;

    let history = domain.event_store.get_aggregate_events(&id).await.unwrap();
    assert!(history[0].is_snapshot());
    assert_eq!(history[0].aggregate_version, 22);
    assert_eq!(history.map(|e| e.aggregate_version), vec![22, 23]);

    let events = domain
        .command_bus
        .send(
            "changeEvent",
            Some(id),
            CommandOptions::payload(json!({ "body": "after" })),
        )
        .await
        .unwrap();
    assert_eq!(events[0].aggregate_version, 24);
}

fn snapshot_store() -> (EventStore, InMemoryEventStorage) {
    let storage = InMemoryEventStorage::new();
    let store = EventStore::with_snapshots(
        Arc::new(storage.clone()),
        Arc::new(InMemorySnapshotStorage::new()),
        Arc::new(InMemoryMessageBus::new()),
    );
    (store, storage)
}

/// The same event one version later, leaving room for a snapshot slot.
fn shifted(event: &Arc<Event>) -> Event {
    let mut event = Event::clone(event);
    event.aggregate_version += 1;
    event
}

proptest! {
    #[test]
    fn snapshot_and_tail_replay_like_the_full_history(
        history in post_history("post-1", 2..30),
        cut in any::<prop::sample::Index>(),
    ) {
        let (store, storage) = snapshot_store();
        let definition = post_definition().unwrap();
        let id = Identifier::new("post-1");
        let cut = cut.index(history.len());

        // The snapshot summarizes the prefix and takes the next version slot.
        let prefix: EventStream = history[..cut].iter().cloned().collect();
        let mut source = Aggregate::new(
            Arc::clone(&definition),
            AggregateOptions::new(id.clone()).with_events(prefix.clone()),
        )
        .unwrap();
        source.take_snapshot().unwrap();
        let snapshot = Arc::clone(&source.changes()[0]);
        prop_assert_eq!(snapshot.aggregate_version, cut as u64);

        let tail: EventStream = history[cut..].iter().map(shifted).collect();
        let log: EventStream = prefix.iter().chain(tail.iter()).cloned().collect();

        let loaded = tokio_test::block_on(async {
            store.save(log.clone()).await?;
            store.save(EventStream::from(vec![snapshot])).await?;
            store.get_aggregate_events(&id).await
        })
        .unwrap();

        prop_assert_eq!(storage.len(), history.len());
        prop_assert!(loaded[0].is_snapshot());
        prop_assert_eq!(loaded[0].aggregate_version, cut as u64);
        prop_assert_eq!(
            loaded.map(|e| e.aggregate_version).split_off(1),
            tail.map(|e| e.aggregate_version)
        );

        let replayed = Aggregate::new(
            Arc::clone(&definition),
            AggregateOptions::new(id.clone()).with_events(log),
        )
        .unwrap();
        let restored =
            Aggregate::new(definition, AggregateOptions::new(id).with_events(loaded)).unwrap();

        prop_assert_eq!(restored.state(), replayed.state());
        prop_assert_eq!(restored.version(), replayed.version());
        prop_assert_eq!(restored.version(), history.len() as u64 + 1);
    }
}
