//! Message-type → handler lookup tables.
//!
//! Aggregates, sagas and projections register one handler per message type
//! up front. A handler may be registered under the message type itself or
//! under an underscore-prefixed alias (`"_EventCreated"`), which keeps it out of
//! the public set of handled types while still making it dispatchable. When
//! both exist, the exact name wins.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Prefix marking a handler as private.
pub const PRIVATE_PREFIX: char = '_';

/// Lookup table from message type to handler.
#[derive(Clone, Debug)]
pub struct HandlerRegistry<H> {
    handlers: BTreeMap<String, H>,
}

impl<H> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<H> HandlerRegistry<H> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, handler: H) -> Self {
        self.insert(name, handler);
        self
    }

    /// Register `handler` under `name` in place.
    pub fn insert(&mut self, name: impl Into<String>, handler: H) {
        self.handlers.insert(name.into(), handler);
    }

    /// Find the handler for `message_type`: the exact name first, then the
    /// underscore alias.
    #[must_use]
    pub fn resolve(&self, message_type: &str) -> Option<&H> {
        self.handlers.get(message_type).or_else(|| {
            self.handlers
                .get(format!("{PRIVATE_PREFIX}{message_type}").as_str())
        })
    }

    /// Like [`resolve`](Self::resolve), but failing when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerNotFound`] when no handler is registered.
    pub fn require(&self, message_type: &str) -> Result<&H> {
        self.resolve(message_type)
            .ok_or_else(|| Error::HandlerNotFound {
                message_type: message_type.to_string(),
            })
    }

    /// Whether `message_type` can be dispatched.
    #[must_use]
    pub fn handles(&self, message_type: &str) -> bool {
        self.resolve(message_type).is_some()
    }

    /// Registered names that are not underscore-prefixed, in sorted order.
    #[must_use]
    pub fn public_names(&self) -> Vec<String> {
        self.handlers
            .keys()
            .filter(|name| !name.starts_with(PRIVATE_PREFIX))
            .cloned()
            .collect()
    }

    /// Check that every declared type resolves to a handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerNotFound`] for the first declared type without
    /// a handler.
    pub fn ensure_handles<S: AsRef<str>>(&self, declared: &[S]) -> Result<()> {
        declared
            .iter()
            .try_for_each(|message_type| self.require(message_type.as_ref()).map(|_| ()))
    }

    /// Number of registered handlers, aliases included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
