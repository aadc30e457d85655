//! The event store: single authority for reading, validating, persisting and
//! publishing events.
//!
//! # Write path
//!
//! ```text
//! commit(events)
//!   │ 1. check: starters not yet bound, snapshot count and support, validation
//!   │ 2. assign a fresh saga id (version 0) to every saga-starter event
//!   │ 3. persist events, then the snapshot
//!   │ 4. publish: hand the stream to the bus (deferred or synchronous)
//!   ▼
//! committed stream (snapshot excluded)
//! ```
//!
//! All contract checks run before the first storage call, id generation
//! included. Starter events are validated in the shape they are committed
//! in, i.e. bound to a saga at version 0.
//!
//! # Publishing
//!
//! With [`PublishMode::Deferred`] a single worker task, spawned on first use,
//! publishes committed streams in commit order. Its failures are broadcast on
//! [`EventStore::publish_failures`] and logged; they never reach the
//! committer.
//!
//! With [`PublishMode::Synchronous`] `commit` awaits the bus and propagates
//! the first failure of its own stream. Streams committed by subscribers while
//! that publish runs (a saga reacting to the event, say) are queued on the
//! publishing task and flushed after it, still in commit order, so every
//! subscriber sees an aggregate's events in storage order. Failures of those
//! queued streams are reported like deferred ones.
//!
//! # Lifetime
//!
//! Handlers registered on the bus by this crate hold a [`WeakEventStore`], so
//! the bus never keeps the store alive. Once the last [`EventStore`] clone is
//! dropped the publish worker stops and those handlers fail with
//! [`Error::StoreDropped`].

use crate::config::{EventStoreConfig, PublishMode};
use crate::metrics::EventStoreMetrics;
use eventide_core::{
    Error, Event, EventFilter, EventHandler, EventStorage, EventStream, Identifier, MessageBus,
    Result, SnapshotStorage,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, Weak};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};

/// Saga id starter events are validated with before the real one is drawn.
const UNASSIGNED_SAGA_ID: &str = "unassigned";

tokio::task_local! {
    /// Streams committed while a synchronous publish runs on this task.
    static PENDING_PUBLISHES: RefCell<VecDeque<(EventStore, EventStream)>>;
}

/// A publication that failed with no committer left to return it to.
#[derive(Debug, Clone)]
pub struct PublishFailure {
    /// The event that could not be published.
    pub event: Arc<Event>,
    /// Why.
    pub error: Error,
}

/// Orchestrates event storage, snapshot storage and the message bus.
///
/// Cloning is cheap; clones share storages, configuration and the publish
/// worker.
#[derive(Clone)]
pub struct EventStore {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn EventStorage>,
    snapshot_storage: Option<Arc<dyn SnapshotStorage>>,
    bus: Arc<dyn MessageBus>,
    config: EventStoreConfig,
    saga_starters: RwLock<Vec<String>>,
    emitter: broadcast::Sender<Arc<Event>>,
    failures: broadcast::Sender<PublishFailure>,
    publisher: OnceLock<mpsc::UnboundedSender<EventStream>>,
}

/// A checked batch, ready to persist.
struct Batch {
    business: EventStream,
    snapshot: Option<Arc<Event>>,
}

/// A non-owning handle to an [`EventStore`].
///
/// Held by bus subscribers so that the bus does not keep the store alive.
#[derive(Clone)]
pub struct WeakEventStore {
    inner: Weak<Inner>,
}

impl WeakEventStore {
    /// The store, while any [`EventStore`] clone is alive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreDropped`] once every clone is gone.
    pub fn upgrade(&self) -> Result<EventStore> {
        self.inner
            .upgrade()
            .map(|inner| EventStore { inner })
            .ok_or(Error::StoreDropped)
    }
}

impl std::fmt::Debug for WeakEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakEventStore")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl EventStore {
    /// Create a store without snapshot support and with default configuration.
    #[must_use]
    pub fn new(storage: Arc<dyn EventStorage>, bus: Arc<dyn MessageBus>) -> Self {
        Self::with_config(storage, None, bus, EventStoreConfig::default())
    }

    /// Create a store with snapshot support and default configuration.
    #[must_use]
    pub fn with_snapshots(
        storage: Arc<dyn EventStorage>,
        snapshot_storage: Arc<dyn SnapshotStorage>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self::with_config(storage, Some(snapshot_storage), bus, EventStoreConfig::default())
    }

    /// Create a store from all of its parts.
    #[must_use]
    pub fn with_config(
        storage: Arc<dyn EventStorage>,
        snapshot_storage: Option<Arc<dyn SnapshotStorage>>,
        bus: Arc<dyn MessageBus>,
        config: EventStoreConfig,
    ) -> Self {
        let (emitter, _) = broadcast::channel(config.emitter_capacity.max(1));
        let (failures, _) = broadcast::channel(config.failure_capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                storage,
                snapshot_storage,
                bus,
                config,
                saga_starters: RwLock::new(Vec::new()),
                emitter,
                failures,
                publisher: OnceLock::new(),
            }),
        }
    }

    /// Whether a snapshot storage is configured.
    #[must_use]
    pub fn snapshots_supported(&self) -> bool {
        self.inner.snapshot_storage.is_some()
    }

    /// A handle that does not keep the store alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakEventStore {
        WeakEventStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The configured publish policy.
    #[must_use]
    pub fn publish_mode(&self) -> PublishMode {
        self.inner.config.publish_mode
    }

    /// A fresh unique identifier from the event storage.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn get_new_id(&self) -> Result<Identifier> {
        self.inner.storage.get_new_id().await
    }

    /// Every persisted event, optionally restricted to `event_types` and
    /// `filter`, in storage order.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn get_all_events(
        &self,
        event_types: Option<&[String]>,
        filter: Option<&EventFilter>,
    ) -> Result<EventStream> {
        let started = Instant::now();
        let unrestricted = EventFilter::default();
        let events = self
            .inner
            .storage
            .get_events(event_types, filter.unwrap_or(&unrestricted))
            .await?;

        EventStoreMetrics::record_load(events.len(), started.elapsed());
        Ok(events)
    }

    /// History of one aggregate: the latest snapshot (when snapshots are
    /// supported and one exists) followed by every later event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingArgument`] for an empty id, or storage failures.
    pub async fn get_aggregate_events(&self, aggregate_id: &Identifier) -> Result<EventStream> {
        if aggregate_id.is_empty() {
            return Err(Error::MissingArgument("aggregateId"));
        }

        let started = Instant::now();
        let snapshot = match &self.inner.snapshot_storage {
            Some(snapshots) => snapshots.get_aggregate_snapshot(aggregate_id).await?,
            None => None,
        };
        let events = self
            .inner
            .storage
            .get_aggregate_events(aggregate_id, snapshot.as_deref())
            .await?;

        let stream: EventStream = match snapshot {
            Some(snapshot) => std::iter::once(snapshot).chain(events.iter().cloned()).collect(),
            None => events,
        };
        EventStoreMetrics::record_load(stream.len(), started.elapsed());
        Ok(stream)
    }

    /// Events of a saga that precede `before_event`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingArgument`] for an empty saga id or when
    /// `before_event` has no saga version, or storage failures.
    pub async fn get_saga_events(
        &self,
        saga_id: &Identifier,
        before_event: &Event,
    ) -> Result<EventStream> {
        if saga_id.is_empty() {
            return Err(Error::MissingArgument("sagaId"));
        }
        if before_event.saga_version.is_none() {
            return Err(Error::MissingArgument("beforeEvent.sagaVersion"));
        }

        let started = Instant::now();
        let events = self.inner.storage.get_saga_events(saga_id, before_event).await?;
        EventStoreMetrics::record_load(events.len(), started.elapsed());
        Ok(events)
    }

    /// Add event types that start a new saga on commit. Known types are
    /// ignored.
    pub fn register_saga_starters<S: AsRef<str>>(&self, event_types: &[S]) {
        let mut starters = self
            .inner
            .saga_starters
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for event_type in event_types {
            let event_type = event_type.as_ref();
            if !starters.iter().any(|known| known == event_type) {
                starters.push(event_type.to_string());
            }
        }
    }

    /// Registered saga-starter event types.
    #[must_use]
    pub fn saga_starters(&self) -> Vec<String> {
        self.inner
            .saga_starters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Check, assign saga ids, persist and publish a batch.
    ///
    /// Returns the committed business events; a snapshot event in the batch
    /// is persisted but not returned or published.
    ///
    /// # Errors
    ///
    /// - [`Error::SagaAlreadyStarted`] when a starter event already has a saga id
    /// - everything [`save`](Self::save) returns
    /// - publish failures in [`PublishMode::Synchronous`]
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    pub async fn commit(&self, events: EventStream) -> Result<EventStream> {
        let starters = self.saga_starters();
        let batch = self.check(&events, &starters)?;
        let batch = self.assign_saga_ids(batch, &starters).await?;
        let committed = self.persist(batch).await?;
        self.publish(committed.clone()).await?;
        Ok(committed)
    }

    /// Validate and persist a batch without publishing it.
    ///
    /// # Errors
    ///
    /// - [`Error::MultipleSnapshots`] for more than one snapshot event
    /// - [`Error::SnapshotsUnsupported`] for a snapshot without snapshot storage
    /// - the validator's error for the first invalid event
    /// - storage failures
    ///
    /// The first three are raised before any storage call.
    pub async fn save(&self, events: EventStream) -> Result<EventStream> {
        let batch = self.check(&events, &[])?;
        self.persist(batch).await
    }

    fn check(&self, events: &EventStream, starters: &[String]) -> Result<Batch> {
        let is_starter = |event_type: &str| starters.iter().any(|s| s == event_type);

        if let Some(bound) = events
            .iter()
            .find(|e| is_starter(&e.event_type) && e.saga().is_some())
        {
            return Err(Error::SagaAlreadyStarted {
                event_type: bound.event_type.clone(),
                saga_id: bound.saga_id.as_ref().map(ToString::to_string).unwrap_or_default(),
            });
        }

        let snapshots = events.filter(Event::is_snapshot);
        if snapshots.len() > 1 {
            return Err(Error::MultipleSnapshots);
        }
        if !snapshots.is_empty() && self.inner.snapshot_storage.is_none() {
            return Err(Error::SnapshotsUnsupported);
        }

        let validator = &self.inner.config.validator;
        let business = events.filter(|e| !e.is_snapshot());
        for event in &business {
            if is_starter(&event.event_type) {
                let bound = Event::clone(event).with_saga(Identifier::new(UNASSIGNED_SAGA_ID), 0);
                validator(&bound)?;
            } else {
                validator(event.as_ref())?;
            }
        }

        Ok(Batch {
            business,
            snapshot: snapshots.first().cloned(),
        })
    }

    async fn assign_saga_ids(&self, batch: Batch, starters: &[String]) -> Result<Batch> {
        let is_starter = |event_type: &str| starters.iter().any(|s| s == event_type);
        if !batch.business.iter().any(|e| is_starter(&e.event_type)) {
            return Ok(batch);
        }

        let mut assigned = Vec::with_capacity(batch.business.len());
        for event in &batch.business {
            if is_starter(&event.event_type) {
                let saga_id = self.inner.storage.get_new_id().await?;
                tracing::debug!(event_type = %event.event_type, saga_id = %saga_id, "Saga started");
                EventStoreMetrics::record_saga_start();
                assigned.push(Arc::new(Event::clone(event).with_saga(saga_id, 0)));
            } else {
                assigned.push(Arc::clone(event));
            }
        }
        Ok(Batch {
            business: EventStream::from(assigned),
            snapshot: batch.snapshot,
        })
    }

    async fn persist(&self, batch: Batch) -> Result<EventStream> {
        let started = Instant::now();
        self.inner.storage.commit_events(batch.business.clone()).await?;

        if let (Some(snapshot), Some(storage)) = (batch.snapshot, &self.inner.snapshot_storage) {
            storage.save_aggregate_snapshot(snapshot).await?;
            EventStoreMetrics::record_snapshot();
        }

        EventStoreMetrics::record_commit(batch.business.len(), started.elapsed());
        Ok(batch.business)
    }

    /// Deliver a committed stream to the bus according to the publish mode.
    ///
    /// # Errors
    ///
    /// In [`PublishMode::Synchronous`], the first bus failure of `events`. In
    /// [`PublishMode::Deferred`], [`Error::ChannelClosed`] if the worker is
    /// gone.
    pub async fn publish(&self, events: EventStream) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        match self.inner.config.publish_mode {
            PublishMode::Synchronous => self.publish_synchronously(events).await,
            PublishMode::Deferred => self
                .publisher()
                .send(events)
                .map_err(|_| Error::ChannelClosed),
        }
    }

    async fn publish_synchronously(&self, events: EventStream) -> Result<()> {
        let queued = PENDING_PUBLISHES.try_with(|pending| {
            pending.borrow_mut().push_back((self.clone(), events.clone()));
        });
        if queued.is_ok() {
            tracing::trace!(count = events.len(), "Publish queued behind the running one");
            return Ok(());
        }

        PENDING_PUBLISHES
            .scope(RefCell::new(VecDeque::new()), async {
                let published = self.publish_stream(&events).await;

                while let Some((store, stream)) =
                    PENDING_PUBLISHES.with(|pending| pending.borrow_mut().pop_front())
                {
                    let inner = &store.inner;
                    publish_reporting(inner.bus.as_ref(), &inner.emitter, &inner.failures, &stream)
                        .await;
                }
                published
            })
            .await
    }

    async fn publish_stream(&self, events: &EventStream) -> Result<()> {
        let bus = self.inner.bus.as_ref();
        for event in events {
            if let Err(error) = publish_event(bus, &self.inner.emitter, event).await {
                tracing::warn!(event_type = %event.event_type, error = %error, "Publish failed");
                return Err(error);
            }
        }
        Ok(())
    }

    fn publisher(&self) -> &mpsc::UnboundedSender<EventStream> {
        self.inner.publisher.get_or_init(|| {
            let (sender, mut receiver) = mpsc::unbounded_channel::<EventStream>();
            let bus = Arc::clone(&self.inner.bus);
            let emitter = self.inner.emitter.clone();
            let failures = self.inner.failures.clone();

            tokio::spawn(async move {
                while let Some(events) = receiver.recv().await {
                    publish_reporting(bus.as_ref(), &emitter, &failures, &events).await;
                }
                tracing::debug!("Publish worker stopped");
            });

            sender
        })
    }

    /// Subscribe to failures of deferred and queued publications.
    #[must_use]
    pub fn publish_failures(&self) -> broadcast::Receiver<PublishFailure> {
        self.inner.failures.subscribe()
    }

    /// Subscribe `handler` to an event type on the bus.
    ///
    /// # Errors
    ///
    /// Propagates the bus's registration error.
    pub fn on(&self, event_type: &str, handler: EventHandler) -> Result<()> {
        self.inner.bus.on(event_type, handler)
    }

    /// A named single-consumer queue of the bus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueuesUnsupported`] when the bus has no named queues.
    pub fn queue(&self, name: &str) -> Result<Arc<dyn MessageBus>> {
        self.inner.bus.queue(name).ok_or(Error::QueuesUnsupported)
    }

    /// Resolve with the next published event of any of `event_types`.
    ///
    /// The subscription is taken when this method is called, so an event
    /// published between the call and the first poll is not missed.
    pub fn once<S: AsRef<str>>(
        &self,
        event_types: &[S],
    ) -> impl Future<Output = Result<Arc<Event>>> + Send + 'static {
        let wanted: Vec<String> = event_types.iter().map(|t| t.as_ref().to_string()).collect();
        let mut receiver = self.inner.emitter.subscribe();

        async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if wanted.iter().any(|t| *t == event.event_type) => return Ok(event),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Err(Error::ChannelClosed),
                }
            }
        }
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("snapshots_supported", &self.snapshots_supported())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

async fn publish_event(
    bus: &dyn MessageBus,
    emitter: &broadcast::Sender<Arc<Event>>,
    event: &Arc<Event>,
) -> Result<()> {
    let published = bus.publish(Arc::clone(event)).await;
    let _ = emitter.send(Arc::clone(event));
    if published.is_err() {
        EventStoreMetrics::record_publish_error();
    }
    published
}

/// Publish every event of `events`, reporting failures instead of stopping.
async fn publish_reporting(
    bus: &dyn MessageBus,
    emitter: &broadcast::Sender<Arc<Event>>,
    failures: &broadcast::Sender<PublishFailure>,
    events: &EventStream,
) {
    for event in events {
        if let Err(error) = publish_event(bus, emitter, event).await {
            tracing::error!(
                event_type = %event.event_type,
                error = %error,
                "Publish failure reported"
            );
            let _ = failures.send(PublishFailure {
                event: Arc::clone(event),
                error,
            });
        }
    }
}
