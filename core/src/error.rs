//! Error taxonomy shared by every Eventide component.
//!
//! Errors are not identified by codes. Integrators classify them by
//! [`ErrorKind`], which mirrors how the failure should be treated:
//!
//! - **Contract**: a programmer error in the hosting application (missing field,
//!   unknown message type, unsupported capability). Raised before any I/O and
//!   never worth retrying.
//! - **Conflict**: the input itself is inconsistent (a starter event already
//!   carrying a saga id, two snapshots in one batch). Retrying the same input
//!   fails again.
//! - **Storage** / **Transport**: failures reported by the external storage or
//!   message bus adapters. Retry policy belongs to those adapters.
//! - **Handler**: a domain handler rejected the command or event.

use thiserror::Error;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Violated precondition or unsupported capability.
    Contract,
    /// Inconsistent input that must not be retried blindly.
    Conflict,
    /// Failure reported by an event, snapshot or view storage.
    Storage,
    /// Failure reported by a message bus or an internal channel.
    Transport,
    /// Rejection raised by a domain handler.
    Handler,
}

/// Errors produced by the toolkit and by the adapters plugged into it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A required argument or field was absent.
    #[error("{0} is required")]
    MissingArgument(&'static str),

    /// An event failed validation.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A command failed validation.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// No handler is registered for a message type that must be handled.
    #[error("'{message_type}' handler is not defined")]
    HandlerNotFound {
        /// The message type that could not be dispatched.
        message_type: String,
    },

    /// A command was sent but nobody subscribed to its type.
    #[error("no '{0}' subscribers found")]
    NoSubscribers(String),

    /// A command type has more than one subscriber.
    #[error("more than one '{0}' subscriber found")]
    MultipleSubscribers(String),

    /// A named queue already has a handler for this message type.
    #[error("'{message_type}' handler is already set up on the '{queue}' queue")]
    DuplicateQueueHandler {
        /// Queue name.
        queue: String,
        /// Message type with an existing handler.
        message_type: String,
    },

    /// The message bus does not provide named queues.
    #[error("named queues are not supported by the underlying message bus")]
    QueuesUnsupported,

    /// A snapshot event was committed to a store without snapshot storage.
    #[error("snapshot event type is not supported by the storage")]
    SnapshotsUnsupported,

    /// Aggregate state could not be written to or read from a snapshot payload.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// A projection view is not usable because its last restore failed.
    #[error("projection '{0}' is not ready: restore has failed")]
    NotReady(String),

    /// A saga starter event already carries a saga id.
    #[error("event '{event_type}' already belongs to saga '{saga_id}'")]
    SagaAlreadyStarted {
        /// Type of the starter event.
        event_type: String,
        /// The saga id found on the event.
        saga_id: String,
    },

    /// More than one snapshot event in a single commit batch.
    #[error("cannot commit a stream with more than 1 snapshot event")]
    MultipleSnapshots,

    /// Event, snapshot or view storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Message bus failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// An internal channel was closed before a result arrived.
    #[error("channel closed")]
    ChannelClosed,

    /// A subscriber outlived the event store it was registered for.
    #[error("event store has been dropped")]
    StoreDropped,

    /// A domain handler rejected the message.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingArgument(_)
            | Self::InvalidEvent(_)
            | Self::InvalidCommand(_)
            | Self::HandlerNotFound { .. }
            | Self::NoSubscribers(_)
            | Self::MultipleSubscribers(_)
            | Self::DuplicateQueueHandler { .. }
            | Self::QueuesUnsupported
            | Self::SnapshotsUnsupported
            | Self::Snapshot(_)
            | Self::NotReady(_) => ErrorKind::Contract,
            Self::SagaAlreadyStarted { .. } | Self::MultipleSnapshots => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Transport(_) | Self::ChannelClosed | Self::StoreDropped => ErrorKind::Transport,
            Self::Rejected(_) => ErrorKind::Handler,
        }
    }

    /// Shorthand for a domain rejection.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// Whether the error was raised before any I/O took place.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self.kind(), ErrorKind::Contract)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Snapshot(err.to_string())
    }
}

/// Result type used across the toolkit.
pub type Result<T> = std::result::Result<T, Error>;
