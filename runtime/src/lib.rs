//! # Eventide Runtime
//!
//! Coordination engine for the Eventide CQRS / event-sourcing toolkit.
//!
//! This crate wires the types and contracts of `eventide-core` together:
//! events are committed through the [`EventStore`], commands are routed by
//! the [`CommandBus`] to an [`AggregateCommandHandler`], and published events
//! reach [`Projection`]s and [`SagaEventHandler`]s.
//!
//! ## Core Components
//!
//! - **EventStore**: validates, persists and publishes events, assigns saga ids
//! - **CommandBus**: sends each command to its single handler
//! - **AggregateCommandHandler**: restore aggregate, handle command, commit changes
//! - **SagaEventHandler**: restore saga, apply event, send queued commands
//! - **Projection**: restore a view from history, then apply live events
//!
//! ## Example
//!
//! ```ignore
//! use eventide_runtime::{AggregateCommandHandler, CommandBus, EventStore, InMemoryMessageBus};
//! use std::sync::Arc;
//!
//! let bus = Arc::new(InMemoryMessageBus::new());
//! let event_store = EventStore::new(storage, bus.clone());
//! let command_bus = CommandBus::new(bus);
//!
//! AggregateCommandHandler::new(event_store.clone(), post_definition)
//!     .subscribe(&command_bus)?;
//!
//! let events = command_bus
//!     .send("createEvent", None, CommandOptions::payload(json!({ "body": "Lorem Ipsum" })))
//!     .await?;
//! ```

/// Aggregate command execution
pub mod aggregate_command_handler;

/// Command routing
pub mod command_bus;

/// Event store configuration
pub mod config;

/// The event store
pub mod event_store;

/// In-process message bus
pub mod in_memory_bus;

/// In-process keyed lock
pub mod lock;

/// Prometheus metrics for observability
pub mod metrics;

/// Projections and their lifecycle
pub mod projection;

/// Saga event handling
pub mod saga_event_handler;

/// Observer subscription plumbing
pub mod subscribe;

pub use aggregate_command_handler::AggregateCommandHandler;
pub use command_bus::CommandBus;
pub use config::{EventStoreConfig, PublishMode};
pub use event_store::{EventStore, PublishFailure, WeakEventStore};
pub use in_memory_bus::InMemoryMessageBus;
pub use lock::InMemoryLock;
pub use projection::{Projection, ProjectionDefinition, ProjectionHandler, ProjectionState};
pub use saga_event_handler::SagaEventHandler;
pub use subscribe::subscribe;
