//! # Eventide Testing
//!
//! Testing utilities and in-memory infrastructure for the Eventide toolkit.
//!
//! This crate provides:
//! - In-memory implementations of every consumed contract
//!   ([`InMemoryEventStorage`], [`InMemorySnapshotStorage`], [`InMemoryView`],
//!   plus the runtime's [`InMemoryMessageBus`] and [`InMemoryLock`])
//! - A deterministic clock
//! - A tracing initialiser for tests
//! - Property-based testing strategies
//! - [`TestDomain`], a blog-post domain wired end to end
//!
//! ## Example
//!
//! ```ignore
//! use eventide_testing::TestDomain;
//! use eventide_core::CommandOptions;
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn create_post() {
//!     let domain = TestDomain::new().await.unwrap();
//!
//!     let events = domain
//!         .command_bus
//!         .send("createEvent", None, CommandOptions::payload(json!({ "body": "Lorem Ipsum" })))
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(events.event_types(), vec!["EventCreated"]);
//! }
//! ```

use chrono::{DateTime, Utc};
use eventide_core::environment::Clock;

pub mod domain;
pub mod storage;
pub mod view;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, so emitted events carry reproducible
    /// timestamps.
    ///
    /// # Example
    ///
    /// ```
    /// use eventide_testing::mocks::FixedClock;
    /// use eventide_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Install a `tracing` subscriber writing through the test harness.
    ///
    /// Honors `RUST_LOG` and defaults to `warn`. Safe to call from every test;
    /// only the first call installs anything.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use eventide_core::{Event, EventStream, Identifier};
    use proptest::prelude::*;
    use serde_json::json;

    /// Post bodies.
    pub fn body() -> impl Strategy<Value = String> {
        "[A-Za-z ]{1,24}"
    }

    /// A well-formed post history for `aggregate_id`: one `EventCreated`
    /// followed by `EventChanged`s, versions `0..len`.
    pub fn post_history(
        aggregate_id: &'static str,
        len: std::ops::Range<usize>,
    ) -> impl Strategy<Value = EventStream> {
        proptest::collection::vec(body(), len).prop_map(move |bodies| {
            bodies
                .into_iter()
                .enumerate()
                .map(|(version, body)| {
                    let event_type = if version == 0 { "EventCreated" } else { "EventChanged" };
                    Event::new(event_type, json!({ "body": body }))
                        .for_aggregate(Identifier::new(aggregate_id), version as u64)
                })
                .collect()
        })
    }
}

// Re-export commonly used items
pub use domain::{PostRecord, PostState, PostsView, TestDomain, TestDomainBuilder};
pub use eventide_runtime::{InMemoryLock, InMemoryMessageBus};
pub use helpers::init_tracing;
pub use mocks::{FixedClock, test_clock};
pub use storage::{InMemoryEventStorage, InMemorySnapshotStorage};
pub use view::InMemoryView;
