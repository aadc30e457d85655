//! Commands through the full stack: command bus, aggregate, event store,
//! projection.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use eventide_core::environment::Clock;
use eventide_core::{
    Aggregate, AggregateDefinition, Command, CommandOptions, Error, Identifier, Result,
};
use eventide_runtime::{
    AggregateCommandHandler, CommandBus, EventStore, PublishMode, SagaEventHandler,
};
use eventide_testing::domain::{post_definition, workflow_definition};
use eventide_testing::{
    InMemoryEventStorage, InMemoryMessageBus, PostState, TestDomain, init_tracing, test_clock,
};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn create_then_change_a_post() {
    init_tracing();
    let domain = TestDomain::new().await.unwrap();

    let projected = domain.view().once("EventCreated");
    let options = CommandOptions::payload(json!({ "body": "Lorem Ipsum" }))
        .with_context(json!({ "reqId": 1234 }));
    let events = domain.command_bus.send("createEvent", None, options).await.unwrap();

    assert_eq!(events.len(), 1);
    let created = &events[0];
    assert_eq!(created.event_type, "EventCreated");
    assert_eq!(created.aggregate_version, 0);
    assert_eq!(created.payload, json!({ "body": "Lorem Ipsum" }));
    assert_eq!(created.context, Some(json!({ "reqId": 1234 })));
    assert_eq!(created.aggregate_timestamp, Some(test_clock().now()));
    let id = created.aggregate_id.clone().expect("generated aggregate id");
    assert!(!id.is_empty());

    projected.await.unwrap();
    assert_eq!(&domain.storage.events()[0], created);

    let projected = domain.view().once("EventChanged");
    let events = domain
        .command_bus
        .send(
            "changeEvent",
            Some(id.clone()),
            CommandOptions::payload(json!({ "body": "Baba Luga" })),
        )
        .await
        .unwrap();

    assert_eq!(events.event_types(), vec!["EventChanged"]);
    assert_eq!(events[0].aggregate_version, 1);
    assert_eq!(events[0].aggregate_id, Some(id.clone()));

    projected.await.unwrap();
    let record = domain.view().get(&id).await.unwrap().unwrap();
    assert_eq!(record.body, "Baba Luga");
}

#[tokio::test]
async fn event_store_once_sees_the_published_event() {
    let domain = TestDomain::new().await.unwrap();

    let next = domain.event_store.once(&["EventChanged", "EventCreated"]);
    domain
        .command_bus
        .send("createEvent", None, CommandOptions::payload(json!({ "body": "x" })))
        .await
        .unwrap();

    let event = next.await.unwrap();
    assert_eq!(event.event_type, "EventCreated");
}

#[tokio::test]
async fn async_handler_deletes_the_post() {
    let domain = TestDomain::builder()
        .with_publish_mode(PublishMode::Synchronous)
        .build()
        .await
        .unwrap();

    let created = domain
        .command_bus
        .send("createEvent", None, CommandOptions::payload(json!({ "body": "x" })))
        .await
        .unwrap();
    let id = created[0].aggregate_id.clone().unwrap();
    assert!(domain.view().read(&id).is_some());

    let deleted = domain
        .command_bus
        .send_raw(Command::new("deleteEvent").for_aggregate(id.clone()))
        .await
        .unwrap();

    assert_eq!(deleted.event_types(), vec!["EventDeleted"]);
    assert_eq!(deleted[0].aggregate_version, 1);
    assert!(domain.view().read(&id).is_none());
}

#[tokio::test]
async fn synchronous_publish_updates_views_before_returning() {
    let domain = TestDomain::builder()
        .with_publish_mode(PublishMode::Synchronous)
        .build()
        .await
        .unwrap();

    let events = domain
        .command_bus
        .send("createEvent", None, CommandOptions::payload(json!({ "body": "now" })))
        .await
        .unwrap();
    let id = events[0].aggregate_id.clone().unwrap();

    assert_eq!(domain.view().read(&id).unwrap().body, "now");
}

#[tokio::test]
async fn unknown_command_has_no_subscribers() {
    let domain = TestDomain::new().await.unwrap();

    let result = domain
        .command_bus
        .send("archiveEvent", None, CommandOptions::default())
        .await;

    assert_eq!(result, Err(Error::NoSubscribers("archiveEvent".to_string())));
    assert!(result.unwrap_err().is_contract_violation());
}

fn ignore(_post: &mut Aggregate<PostState>, _command: &Command) -> Result<()> {
    Ok(())
}

fn emit_then_reject(post: &mut Aggregate<PostState>, _command: &Command) -> Result<()> {
    post.emit("EventChanged", json!({ "body": "half-done" }))?;
    Err(Error::rejected("post is locked"))
}

#[tokio::test]
async fn command_without_events_skips_storage() {
    let domain = TestDomain::new().await.unwrap();
    let definition = AggregateDefinition::new("Draft")
        .command("touchDraft", ignore)
        .build()
        .unwrap();
    AggregateCommandHandler::new(domain.event_store.clone(), definition)
        .subscribe(&domain.command_bus)
        .unwrap();

    let events = domain
        .command_bus
        .send_raw(Command::new("touchDraft").for_aggregate("draft-1"))
        .await
        .unwrap();

    assert!(events.is_empty());
    assert_eq!(domain.storage.commit_calls(), 0);
}

#[tokio::test]
async fn failing_handler_persists_nothing() {
    let domain = TestDomain::new().await.unwrap();
    let definition = AggregateDefinition::new("Draft")
        .command("publishDraft", emit_then_reject)
        .build()
        .unwrap();
    AggregateCommandHandler::new(domain.event_store.clone(), definition)
        .subscribe(&domain.command_bus)
        .unwrap();

    let result = domain
        .command_bus
        .send_raw(Command::new("publishDraft").for_aggregate("draft-1"))
        .await;

    assert_eq!(result, Err(Error::rejected("post is locked")));
    assert!(domain.storage.is_empty());
}

#[tokio::test]
async fn namespaced_ids_carry_the_aggregate_name() {
    let domain = TestDomain::new().await.unwrap();
    let definition = AggregateDefinition::new("Note")
        .command("writeNote", |note: &mut Aggregate<PostState>, command: &Command| {
            note.emit("NoteWritten", command.payload.clone())
        })
        .with_namespaced_ids()
        .build()
        .unwrap();
    let handler = AggregateCommandHandler::new(domain.event_store.clone(), Arc::clone(&definition));
    assert_eq!(handler.handles(), ["writeNote".to_string()]);
    handler.subscribe(&domain.command_bus).unwrap();

    let events = domain
        .command_bus
        .send("writeNote", None, CommandOptions::payload(json!({ "text": "hi" })))
        .await
        .unwrap();

    let id: &Identifier = events[0].aggregate_id.as_ref().unwrap();
    assert!(id.as_str().starts_with("note-"));
}

#[tokio::test]
async fn handlers_do_not_keep_the_store_alive() {
    let bus = Arc::new(InMemoryMessageBus::new());
    let command_bus = CommandBus::new(bus.clone());
    let store = EventStore::new(Arc::new(InMemoryEventStorage::new()), bus.clone());

    AggregateCommandHandler::new(store.clone(), post_definition().unwrap())
        .subscribe(&command_bus)
        .unwrap();
    SagaEventHandler::new(workflow_definition().unwrap(), store.clone(), command_bus.clone())
        .subscribe()
        .unwrap();

    let weak = store.downgrade();
    assert!(weak.upgrade().is_ok());
    drop(store);
    assert_eq!(weak.upgrade().err(), Some(Error::StoreDropped));

    let result = command_bus
        .send("createEvent", None, CommandOptions::payload(json!({ "body": "late" })))
        .await;
    assert_eq!(result, Err(Error::StoreDropped));
}
