//! A small blog-post domain wired end to end on in-memory infrastructure.
//!
//! - `Post` aggregate: `createEvent`, `changeEvent`, `deleteEvent`,
//!   `doSomething`, `doSomethingElse`; snapshots after more than 10 versions
//! - `Views` projection into an [`InMemoryView`] of [`PostRecord`]s
//! - `Workflow` saga: on `EventCreated` sends `doSomething` then
//!   `doSomethingElse` to the same post

use crate::mocks::test_clock;
use crate::storage::{InMemoryEventStorage, InMemorySnapshotStorage};
use crate::view::InMemoryView;
use eventide_core::{
    Aggregate, AggregateDefinition, AggregateState, BoxFuture, Command, Error, Event, Identifier,
    MessageBus, Result, Saga, SagaDefinition, SnapshotPolicy, SnapshotStorage,
};
use eventide_runtime::{
    AggregateCommandHandler, CommandBus, EventStore, EventStoreConfig, InMemoryMessageBus,
    Projection, ProjectionDefinition, PublishMode, SagaEventHandler,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// State of the `Post` aggregate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PostState {
    /// Current body.
    pub body: String,
}

impl AggregateState for PostState {
    fn mutate(&mut self, event: &Event) {
        match event.event_type.as_str() {
            "EventCreated" | "EventChanged" => {
                self.body = event.payload["body"].as_str().unwrap_or_default().to_string();
            }
            "EventDeleted" => self.body.clear(),
            _ => {}
        }
    }

    fn snapshot(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn restore(snapshot: &Value) -> Result<Self> {
        Ok(serde_json::from_value(snapshot.clone())?)
    }
}

fn create_post(post: &mut Aggregate<PostState>, command: &Command) -> Result<()> {
    post.emit("EventCreated", command.payload.clone())
}

fn change_post(post: &mut Aggregate<PostState>, command: &Command) -> Result<()> {
    post.emit("EventChanged", command.payload.clone())
}

fn delete_post<'a>(
    post: &'a mut Aggregate<PostState>,
    _command: &'a Command,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        post.emit("EventDeleted", Value::Null)
    })
}

fn do_something(post: &mut Aggregate<PostState>, command: &Command) -> Result<()> {
    post.emit("SomethingDone", command.payload.clone())
}

fn do_something_else(post: &mut Aggregate<PostState>, command: &Command) -> Result<()> {
    post.emit("SomethingElseDone", command.payload.clone())
}

/// The `Post` aggregate definition.
///
/// # Errors
///
/// Never in practice; kept fallible like every definition build.
pub fn post_definition() -> Result<Arc<AggregateDefinition<PostState>>> {
    AggregateDefinition::new("Post")
        .command("createEvent", create_post)
        .command("changeEvent", change_post)
        .command_async("deleteEvent", delete_post)
        .command("doSomething", do_something)
        .command("doSomethingElse", do_something_else)
        .with_snapshot_policy(SnapshotPolicy::AfterVersions(10))
        .with_clock(Arc::new(test_clock()))
        .build()
}

/// One row of the `Views` projection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PostRecord {
    /// Current body.
    pub body: String,
    /// Whether `SomethingDone` was projected.
    pub something_done: bool,
    /// Whether `SomethingElseDone` was projected.
    pub something_else_done: bool,
    /// Saga side effects in projection order.
    pub stack: Vec<String>,
}

/// The view behind the `Views` projection.
pub type PostsView = InMemoryView<PostRecord>;

fn aggregate_id(event: &Event) -> Result<Identifier> {
    event.aggregate().cloned().ok_or(Error::MissingArgument("event.aggregateId"))
}

fn body(event: &Event) -> String {
    event.payload["body"].as_str().unwrap_or_default().to_string()
}

fn post_created(view: &PostsView, event: &Event) -> Result<()> {
    let record = PostRecord {
        body: body(event),
        ..PostRecord::default()
    };
    view.create(aggregate_id(event)?, record)
}

fn post_changed(view: &PostsView, event: &Event) -> Result<()> {
    view.update(&aggregate_id(event)?, |record| record.body = body(event))
}

fn post_deleted<'a>(view: &'a PostsView, event: &'a Event) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        tokio::task::yield_now().await;
        view.delete(&aggregate_id(event)?);
        Ok(())
    })
}

fn something_done(view: &PostsView, event: &Event) -> Result<()> {
    view.update(&aggregate_id(event)?, |record| {
        record.something_done = true;
        record.stack.push(event.event_type.clone());
    })
}

fn something_else_done(view: &PostsView, event: &Event) -> Result<()> {
    view.update(&aggregate_id(event)?, |record| {
        record.something_else_done = true;
        record.stack.push(event.event_type.clone());
    })
}

/// The `Views` projection definition.
///
/// # Errors
///
/// Never in practice; kept fallible like every definition build.
pub fn views_definition() -> Result<Arc<ProjectionDefinition<PostsView>>> {
    ProjectionDefinition::new("Views")
        .on("EventCreated", post_created)
        .on("EventChanged", post_changed)
        .on_async("EventDeleted", post_deleted)
        .on("SomethingDone", something_done)
        .on("SomethingElseDone", something_else_done)
        .build()
}

/// State of the `Workflow` saga.
#[derive(Debug, Default)]
pub struct WorkflowState {
    /// Posts this saga instance has seen.
    pub posts: Vec<Identifier>,
}

fn workflow_started(saga: &mut Saga<WorkflowState>, event: &Event) -> Result<()> {
    let post = aggregate_id(event)?;
    saga.state_mut().posts.push(post.clone());
    saga.enqueue("doSomething", Some(post.clone()), json!({ "source": "workflow" }));
    saga.enqueue("doSomethingElse", Some(post), json!({ "source": "workflow" }));
    Ok(())
}

/// The `Workflow` saga definition.
///
/// # Errors
///
/// Never in practice; kept fallible like every definition build.
pub fn workflow_definition() -> Result<Arc<SagaDefinition<WorkflowState>>> {
    SagaDefinition::new("Workflow")
        .starts_with(["EventCreated"])
        .on("EventCreated", workflow_started)
        .build()
}

/// Builder for [`TestDomain`].
#[derive(Debug, Clone)]
pub struct TestDomainBuilder {
    snapshots: bool,
    saga: bool,
    publish_mode: PublishMode,
}

impl Default for TestDomainBuilder {
    fn default() -> Self {
        Self {
            snapshots: true,
            saga: false,
            publish_mode: PublishMode::Deferred,
        }
    }
}

impl TestDomainBuilder {
    /// Run without snapshot storage.
    #[must_use]
    pub const fn without_snapshots(mut self) -> Self {
        self.snapshots = false;
        self
    }

    /// Also run the `Workflow` saga.
    #[must_use]
    pub const fn with_saga(mut self) -> Self {
        self.saga = true;
        self
    }

    /// Set the event store's publish mode.
    #[must_use]
    pub const fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    /// Wire everything and restore the projection.
    ///
    /// # Errors
    ///
    /// Subscription or restore failures.
    pub async fn build(self) -> Result<TestDomain> {
        let storage = InMemoryEventStorage::new();
        let snapshots = self.snapshots.then(InMemorySnapshotStorage::new);
        let bus = Arc::new(InMemoryMessageBus::new());
        let shared: Arc<dyn MessageBus> = bus.clone();

        let event_store = EventStore::with_config(
            Arc::new(storage.clone()),
            snapshots
                .clone()
                .map(|s| Arc::new(s) as Arc<dyn SnapshotStorage>),
            Arc::clone(&shared),
            EventStoreConfig::default().with_publish_mode(self.publish_mode),
        );
        let command_bus = CommandBus::new(shared);

        AggregateCommandHandler::new(event_store.clone(), post_definition()?)
            .subscribe(&command_bus)?;

        if self.saga {
            SagaEventHandler::new(workflow_definition()?, event_store.clone(), command_bus.clone())
                .subscribe()?;
        }

        let views = Projection::new(views_definition()?, PostsView::new());
        views.subscribe(&event_store).await?;

        Ok(TestDomain {
            storage,
            snapshots,
            bus,
            event_store,
            command_bus,
            views,
        })
    }
}

/// The blog-post domain on in-memory infrastructure.
#[derive(Debug)]
pub struct TestDomain {
    /// Event log.
    pub storage: InMemoryEventStorage,
    /// Snapshot storage, when enabled.
    pub snapshots: Option<InMemorySnapshotStorage>,
    /// Shared message bus.
    pub bus: Arc<InMemoryMessageBus>,
    /// The event store.
    pub event_store: EventStore,
    /// The command bus.
    pub command_bus: CommandBus,
    /// The `Views` projection.
    pub views: Projection<PostsView>,
}

impl TestDomain {
    /// Start configuring a domain.
    #[must_use]
    pub fn builder() -> TestDomainBuilder {
        TestDomainBuilder::default()
    }

    /// A domain with snapshots, deferred publishing and no saga.
    ///
    /// # Errors
    ///
    /// See [`TestDomainBuilder::build`].
    pub async fn new() -> Result<Self> {
        Self::builder().build().await
    }

    /// The projection's view.
    #[must_use]
    pub fn view(&self) -> &PostsView {
        self.views.view()
    }
}
