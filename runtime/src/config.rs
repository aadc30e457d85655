//! Event store configuration.

use eventide_core::{EventValidator, default_validator};
use std::fmt;

/// How committed events reach the message bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Hand the committed stream to a background worker and return.
    ///
    /// The worker publishes streams in commit order. Failures are reported on
    /// [`EventStore::publish_failures`](crate::EventStore::publish_failures)
    /// and through `tracing`, never to the committer.
    #[default]
    Deferred,
    /// Publish before `commit` returns and propagate failures.
    Synchronous,
}

/// Configuration for [`EventStore`](crate::EventStore).
///
/// # Example
///
/// ```
/// use eventide_runtime::{EventStoreConfig, PublishMode};
///
/// let config = EventStoreConfig::default()
///     .with_publish_mode(PublishMode::Synchronous)
///     .with_failure_capacity(16);
/// assert_eq!(config.publish_mode, PublishMode::Synchronous);
/// ```
#[derive(Clone)]
pub struct EventStoreConfig {
    /// Publish policy
    pub publish_mode: PublishMode,
    /// Validator applied to every non-snapshot event before persistence
    pub validator: EventValidator,
    /// Capacity of the publish-failure broadcast channel
    pub failure_capacity: usize,
    /// Capacity of the internal channel backing `once`
    pub emitter_capacity: usize,
}

impl EventStoreConfig {
    /// Set the publish policy
    #[must_use]
    pub const fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    /// Replace the event validator
    #[must_use]
    pub fn with_validator(mut self, validator: EventValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Set how many unread publish failures subscribers may lag behind
    #[must_use]
    pub const fn with_failure_capacity(mut self, capacity: usize) -> Self {
        self.failure_capacity = capacity;
        self
    }

    /// Set how many unread published events `once` waiters may lag behind
    #[must_use]
    pub const fn with_emitter_capacity(mut self, capacity: usize) -> Self {
        self.emitter_capacity = capacity;
        self
    }
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            publish_mode: PublishMode::Deferred,
            validator: default_validator(),
            failure_capacity: 64,
            emitter_capacity: 1024,
        }
    }
}

impl fmt::Debug for EventStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStoreConfig")
            .field("publish_mode", &self.publish_mode)
            .field("failure_capacity", &self.failure_capacity)
            .field("emitter_capacity", &self.emitter_capacity)
            .finish_non_exhaustive()
    }
}
