//! # Eventide Core
//!
//! Core types and contracts for the Eventide CQRS / event-sourcing toolkit.
//!
//! This crate holds everything that does not coordinate I/O by itself: the
//! message value types, the aggregate and saga state machines, and the narrow
//! contracts that storages, buses, locks and views implement. The
//! coordination engine (event store, command bus, projections) lives in
//! `eventide-runtime`.
//!
//! ## Core Concepts
//!
//! - **Event**: an immutable fact, the unit of persistence and broadcast
//! - **Command**: a request to change state, routed to exactly one handler
//! - **Aggregate**: write-side state derived purely from its own events
//! - **Saga**: a process manager turning events into follow-up commands
//! - **View**: a read model maintained by a projection
//!
//! ## Data Flow
//!
//! ```text
//! Command ─► Aggregate ─► Events ─► EventStore ─► MessageBus ─┬─► Projection ─► View
//!                ▲                                            └─► Saga ─┐
//!                └──────────────────── Command ◄────────────────────────┘
//! ```
//!
//! ## Contracts
//!
//! | Trait | Role |
//! |---|---|
//! | [`EventStorage`] | append-only event log |
//! | [`SnapshotStorage`] | aggregate checkpoints (optional) |
//! | [`MessageBus`] | event fan-out, command routing, named queues |
//! | [`Lock`] | keyed mutual exclusion |
//! | [`View`] | projection target, optionally lock-aware |

pub mod aggregate;
pub mod bus;
pub mod command;
pub mod error;
pub mod event;
pub mod handlers;
pub mod identifier;
pub mod lock;
pub mod saga;
pub mod storage;
pub mod stream;
pub mod validation;
pub mod view;

pub use aggregate::{
    Aggregate, AggregateDefinition, AggregateFactory, AggregateOptions, AggregateState,
    SnapshotPolicy,
};
pub use bus::{CommandHandler, EventHandler, MessageBus, command_handler, event_handler};
pub use command::{Command, CommandOptions};
pub use error::{Error, ErrorKind, Result};
pub use event::{Event, SNAPSHOT_EVENT_TYPE};
pub use handlers::HandlerRegistry;
pub use identifier::Identifier;
pub use lock::{Lock, LockGuard};
pub use saga::{Saga, SagaDefinition, SagaState};
pub use storage::{BoxFuture, EventFilter, EventStorage, SnapshotStorage};
pub use stream::EventStream;
pub use validation::{EventValidator, default_validator, validate_event};
pub use view::{View, ViewLock, ViewStatus};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde_json::{Value, json};

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time for deterministic tests
    ///
    /// Aggregates stamp `aggregateTimestamp` from their definition's clock.
    ///
    /// # Examples
    ///
    /// ```
    /// use eventide_core::environment::Clock;
    /// use eventide_core::{DateTime, Utc};
    ///
    /// struct FixedClock { time: DateTime<Utc> }
    ///
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
